//! DAT import/export - Logiqx XML and ClrMamePro formats
//!
//! Both formats carry the same vocabulary (`game`, `rom`, `disk`, `release`,
//! `biosset`, `sample`, `archive` and their attributes), so field mapping is
//! shared here and each format only deals with its own syntax.

mod clrmame;
mod xml;

pub use clrmame::ClrMameDat;
pub use xml::XmlDat;

use crate::checksum::{from_hex, to_hex};
use crate::error::{Result, RomError};
use crate::model::{BiosSet, DatabaseHeader, DetailKey, Game, GameDatabase, Release, RomDisk, RomFile, RomStatus};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Turns DAT text into a database.
pub trait DatabaseImporter {
    fn name(&self) -> &'static str;

    /// Cheap textual sniff of the leading content.
    fn can_import(&self, text: &str) -> bool;

    /// Parse `text`. `working_folder` is the folder the DAT was read from.
    fn import(&self, text: &str, working_folder: &Path) -> Result<GameDatabase>;
}

/// Turns a database back into DAT text.
pub trait DatabaseExporter {
    fn export(&self, db: &GameDatabase) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatFormat {
    Xml,
    ClrMame,
}

impl DatFormat {
    pub fn exporter(self) -> &'static dyn DatabaseExporter {
        match self {
            Self::Xml => &XmlDat,
            Self::ClrMame => &ClrMameDat,
        }
    }

    pub fn importer(self) -> &'static dyn DatabaseImporter {
        match self {
            Self::Xml => &XmlDat,
            Self::ClrMame => &ClrMameDat,
        }
    }

    /// Format of a DAT text, if any importer accepts it.
    pub fn detect(text: &str) -> Option<Self> {
        [Self::Xml, Self::ClrMame]
            .into_iter()
            .find(|format| format.importer().can_import(text))
    }
}

impl fmt::Display for DatFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Xml => "xml",
            Self::ClrMame => "clrmame",
        })
    }
}

impl FromStr for DatFormat {
    type Err = RomError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "xml" | "logiqx" => Ok(Self::Xml),
            "clrmame" | "clrmamepro" | "cmp" | "dat" => Ok(Self::ClrMame),
            other => Err(RomError::invalid(format!("unknown DAT format '{}'", other))),
        }
    }
}

/// Read and parse a DAT file of either format.
pub fn load_database(path: &Path) -> Result<GameDatabase> {
    let content = fs::read_to_string(path)?;

    // Strip UTF-8 BOM if present
    let content = content.strip_prefix('\u{feff}').unwrap_or(&content);

    let format = DatFormat::detect(content)
        .ok_or_else(|| RomError::malformed(format!("{} is not a recognised DAT file", path.display())))?;
    log::debug!("Loading {} as {}", path.display(), format);

    let working_folder = path.parent().unwrap_or_else(|| Path::new("."));
    format.importer().import(content, working_folder)
}

/// Export `db` in `format` and write it to `path`.
pub fn save_database(db: &GameDatabase, path: &Path, format: DatFormat) -> Result<()> {
    let text = format.exporter().export(db)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, text)?;
    Ok(())
}

pub(crate) fn parse_size(value: &str) -> Result<u64> {
    let trimmed = value.trim();
    let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => trimmed.parse(),
    };
    parsed.map_err(|_| RomError::malformed(format!("invalid size '{}'", value)))
}

pub(crate) fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "yes" | "true" | "1")
}

pub(crate) fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

pub(crate) fn apply_header_field(header: &mut DatabaseHeader, key: &str, value: &str) {
    let value = value.to_string();
    match key {
        "name" => header.name = value,
        "description" => header.description = value,
        "category" => header.category = value,
        "version" => header.version = value,
        "date" => header.date = value,
        "author" => header.author = value,
        "email" => header.email = value,
        "homepage" => header.homepage = value,
        "url" => header.url = value,
        "comment" => header.comment = value,
        _ => log::debug!("Ignoring header field '{}'", key),
    }
}

/// Header fields in export order, empty ones left out.
pub(crate) fn header_fields(header: &DatabaseHeader) -> Vec<(&'static str, &str)> {
    [
        ("name", header.name.as_str()),
        ("description", header.description.as_str()),
        ("category", header.category.as_str()),
        ("version", header.version.as_str()),
        ("date", header.date.as_str()),
        ("author", header.author.as_str()),
        ("email", header.email.as_str()),
        ("homepage", header.homepage.as_str()),
        ("url", header.url.as_str()),
        ("comment", header.comment.as_str()),
    ]
    .into_iter()
    .filter(|(_, v)| !v.is_empty())
    .collect()
}

/// The `emulator` header block as (`name`, `version`) fields, if either is set.
pub(crate) fn emulator_fields(header: &DatabaseHeader) -> Option<Vec<(&'static str, String)>> {
    if header.emulator_name.is_empty() && header.emulator_version.is_empty() {
        return None;
    }
    Some(
        [("name", &header.emulator_name), ("version", &header.emulator_version)]
            .into_iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k, v.clone()))
            .collect(),
    )
}

pub(crate) fn apply_emulator_field(header: &mut DatabaseHeader, key: &str, value: &str) {
    match key {
        "name" => header.emulator_name = value.to_string(),
        "version" => header.emulator_version = value.to_string(),
        _ => log::debug!("Ignoring emulator field '{}'", key),
    }
}

/// Set a scalar game field. Returns false for keys that are not game fields.
pub(crate) fn apply_game_field(game: &mut Game, key: &str, value: &str) -> bool {
    match key {
        "name" => game.name = value.to_string(),
        "description" => game.description = value.to_string(),
        "year" => game.year = value.to_string(),
        "manufacturer" => game.manufacturer = value.to_string(),
        "cloneof" => game.clone_of = non_empty(value),
        "romof" => game.rom_of = non_empty(value),
        "sampleof" => game.sample_of = non_empty(value),
        "sourcefile" => game.source_file = value.to_string(),
        "board" => game.board = value.to_string(),
        "rebuildto" => game.rebuild_to = value.to_string(),
        "isbios" => {
            game.is_bios = parse_bool(value);
            game.is_bios_declared = true;
        }
        "comment" => game.comments.push(value.to_string()),
        _ => return false,
    }
    true
}

pub(crate) fn add_detail(game: &mut Game, key: &str, value: &str) {
    game.details.insert(DetailKey::new(key), value.to_string());
}

/// Lineage attributes of a game in export order.
pub(crate) fn game_attributes(game: &Game) -> Vec<(&'static str, &str)> {
    [
        ("name", Some(game.name.as_str())),
        ("sourcefile", Some(game.source_file.as_str())),
        ("cloneof", game.clone_of.as_deref()),
        ("romof", game.rom_of.as_deref()),
        ("sampleof", game.sample_of.as_deref()),
        ("board", Some(game.board.as_str())),
        ("rebuildto", Some(game.rebuild_to.as_str())),
    ]
    .into_iter()
    .filter_map(|(k, v)| v.filter(|v| !v.is_empty()).map(|v| (k, v)))
    .collect()
}

pub(crate) fn apply_rom_field(rom: &mut RomFile, key: &str, value: &str) -> Result<()> {
    match key {
        "name" => rom.name = value.to_string(),
        "size" => rom.size = parse_size(value)?,
        "crc" => rom.checksums.crc32 = from_hex(value)?,
        "md5" => rom.checksums.md5 = from_hex(value)?,
        "sha1" => rom.checksums.sha1 = from_hex(value)?,
        "sha256" => rom.checksums.sha256 = from_hex(value)?,
        "merge" => rom.merge = Some(value.to_string()),
        "status" => rom.status = value.parse()?,
        "date" => rom.date = non_empty(value),
        _ => log::debug!("Ignoring rom field '{}'", key),
    }
    Ok(())
}

pub(crate) fn rom_fields(rom: &RomFile) -> Vec<(&'static str, String)> {
    let mut fields = vec![("name", rom.name.clone())];
    fields.push(("size", rom.size.to_string()));
    for (key, value) in [
        ("crc", &rom.checksums.crc32),
        ("md5", &rom.checksums.md5),
        ("sha1", &rom.checksums.sha1),
        ("sha256", &rom.checksums.sha256),
    ] {
        if !value.is_empty() {
            fields.push((key, to_hex(value)));
        }
    }
    if let Some(merge) = rom.merge.as_deref().filter(|m| !m.is_empty()) {
        fields.push(("merge", merge.to_string()));
    }
    if rom.status != RomStatus::Good {
        fields.push(("status", rom.status.to_string()));
    }
    if let Some(date) = &rom.date {
        fields.push(("date", date.clone()));
    }
    fields
}

pub(crate) fn apply_disk_field(disk: &mut RomDisk, key: &str, value: &str) -> Result<()> {
    match key {
        "name" => disk.name = value.to_string(),
        "md5" => disk.md5 = from_hex(value)?,
        "sha1" => disk.sha1 = from_hex(value)?,
        "merge" => disk.merge = Some(value.to_string()),
        "status" => disk.status = value.parse()?,
        _ => log::debug!("Ignoring disk field '{}'", key),
    }
    Ok(())
}

pub(crate) fn disk_fields(disk: &RomDisk) -> Vec<(&'static str, String)> {
    let mut fields = vec![("name", disk.name.clone())];
    if !disk.md5.is_empty() {
        fields.push(("md5", to_hex(&disk.md5)));
    }
    if !disk.sha1.is_empty() {
        fields.push(("sha1", to_hex(&disk.sha1)));
    }
    if let Some(merge) = disk.merge.as_deref().filter(|m| !m.is_empty()) {
        fields.push(("merge", merge.to_string()));
    }
    if disk.status != RomStatus::Good {
        fields.push(("status", disk.status.to_string()));
    }
    fields
}

pub(crate) fn apply_release_field(release: &mut Release, key: &str, value: &str) {
    match key {
        "name" => release.name = value.to_string(),
        "region" => release.region = value.to_string(),
        "language" => release.language = value.to_string(),
        "date" => release.date = value.to_string(),
        "default" => release.is_default = parse_bool(value),
        _ => {}
    }
}

pub(crate) fn release_fields(release: &Release) -> Vec<(&'static str, String)> {
    let mut fields = vec![("name", release.name.clone()), ("region", release.region.clone())];
    if !release.language.is_empty() {
        fields.push(("language", release.language.clone()));
    }
    if !release.date.is_empty() {
        fields.push(("date", release.date.clone()));
    }
    fields.push(("default", yes_no(release.is_default).to_string()));
    fields
}

pub(crate) fn apply_biosset_field(bios: &mut BiosSet, key: &str, value: &str) {
    match key {
        "name" => bios.name = value.to_string(),
        "description" => bios.description = value.to_string(),
        "default" => bios.is_default = parse_bool(value),
        _ => {}
    }
}

pub(crate) fn biosset_fields(bios: &BiosSet) -> Vec<(&'static str, String)> {
    vec![
        ("name", bios.name.clone()),
        ("description", bios.description.clone()),
        ("default", yes_no(bios.is_default).to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_detects_both_formats() {
        assert_eq!(
            DatFormat::detect("<?xml version=\"1.0\"?>\n<datafile></datafile>"),
            Some(DatFormat::Xml)
        );
        assert_eq!(
            DatFormat::detect("clrmamepro (\n\tname \"x\"\n)\n"),
            Some(DatFormat::ClrMame)
        );
        assert_eq!(DatFormat::detect("hello world"), None);
    }

    #[test]
    fn test_load_strips_bom_and_rejects_unknown_text() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("set.dat");
        fs::write(
            &good,
            "\u{feff}<?xml version=\"1.0\"?><datafile><game name=\"g\"><rom name=\"a\" size=\"1\" crc=\"01\"/></game></datafile>",
        )
        .unwrap();
        let db = load_database(&good).unwrap();
        assert_eq!(db.game_count(), 1);

        let bad = dir.path().join("notes.txt");
        fs::write(&bad, "just some notes").unwrap();
        assert!(matches!(load_database(&bad), Err(RomError::MalformedDat(_))));
    }

    #[test]
    fn test_save_and_reload_in_other_format() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("set.xml");
        fs::write(
            &source,
            r#"<?xml version="1.0"?>
<datafile>
  <header><name>Set</name></header>
  <game name="p"><description>Parent</description><rom name="x.bin" size="10" crc="11111111"/></game>
  <game name="c" cloneof="p" romof="p"><rom name="x.bin" merge="x.bin" size="10" crc="11111111"/></game>
</datafile>"#,
        )
        .unwrap();

        let db = load_database(&source).unwrap();
        let target = dir.path().join("out/set.dat");
        save_database(&db, &target, DatFormat::ClrMame).unwrap();
        let reloaded = load_database(&target).unwrap();

        assert_eq!(reloaded.header.name, "Set");
        assert_eq!(reloaded.games(), db.games());
    }

    #[test]
    fn test_size_parsing() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("0x400").unwrap(), 1024);
        assert!(parse_size("big").is_err());
    }
}
