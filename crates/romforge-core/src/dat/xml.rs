use super::{
    DatabaseExporter, DatabaseImporter, add_detail, apply_biosset_field, apply_disk_field, apply_emulator_field,
    apply_game_field, apply_header_field, apply_release_field, apply_rom_field, biosset_fields, disk_fields,
    emulator_fields, game_attributes, header_fields, release_fields, rom_fields,
};
use crate::error::{Result, RomError};
use crate::model::{
    BiosSet, DatabaseHeader, Game, GameDatabase, Release, RomArchive, RomDisk, RomFile, RomSample,
};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use std::io::Write;
use std::path::Path;

const DOCTYPE: &str =
    r#"datafile PUBLIC "-//Logiqx//DTD ROM Management Datafile//EN" "http://www.logiqx.com/Dats/datafile.dtd""#;

/// Logiqx XML datafiles (the ClrMamePro XML dialect), including MAME
/// `machine` and software-list `software` elements.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlDat;

fn tag_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).to_string()
}

/// Unescaped attributes of an element.
fn attributes(e: &BytesStart) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr.unescape_value()?.to_string();
        out.push((key, value));
    }
    Ok(out)
}

fn is_game_tag(tag: &str) -> bool {
    matches!(tag, "game" | "machine" | "software")
}

#[derive(Default)]
struct ImportState {
    header: DatabaseHeader,
    games: Vec<Game>,
    current: Option<Game>,
    in_header: bool,
    text_target: Option<String>,
    text: String,
}

impl ImportState {
    fn start_game(&mut self, e: &BytesStart) -> Result<()> {
        let mut game = Game::default();
        for (key, value) in attributes(e)? {
            if !apply_game_field(&mut game, &key, &value) {
                add_detail(&mut game, &key, &value);
            }
        }
        self.current = Some(game);
        Ok(())
    }

    /// `<emulator name=".." version=".."/>` inside the header.
    fn header_element(&mut self, tag: &str, e: &BytesStart) -> Result<bool> {
        if !self.in_header || tag != "emulator" {
            return Ok(false);
        }
        for (key, value) in attributes(e)? {
            apply_emulator_field(&mut self.header, &key, &value);
        }
        Ok(true)
    }

    fn finish_game(&mut self) {
        if let Some(game) = self.current.take() {
            self.games.push(game);
        }
    }

    /// Attribute-only children of a game. Returns false for other tags.
    fn child_element(&mut self, tag: &str, e: &BytesStart) -> Result<bool> {
        let Some(game) = self.current.as_mut() else {
            return Ok(false);
        };
        let attrs = attributes(e)?;
        let value_of = |name: &str| {
            attrs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };

        match tag {
            "rom" => {
                let mut rom = RomFile::default();
                for (key, value) in &attrs {
                    apply_rom_field(&mut rom, key, value)?;
                }
                game.roms.push(rom);
            }
            "disk" => {
                let mut disk = RomDisk::default();
                for (key, value) in &attrs {
                    apply_disk_field(&mut disk, key, value)?;
                }
                game.disks.push(disk);
            }
            "sample" => game.samples.push(RomSample { name: value_of("name") }),
            "archive" => game.archives.push(RomArchive { name: value_of("name") }),
            "release" => {
                let mut release = Release::default();
                for (key, value) in &attrs {
                    apply_release_field(&mut release, key, value);
                }
                game.releases.push(release);
            }
            "biosset" => {
                let mut bios = BiosSet::default();
                for (key, value) in &attrs {
                    apply_biosset_field(&mut bios, key, value);
                }
                game.bios_sets.push(bios);
            }
            "info" => add_detail(game, &value_of("name"), &value_of("value")),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn finish_text(&mut self, tag: &str) {
        if self.text_target.as_deref() != Some(tag) {
            return;
        }
        self.text_target = None;
        let text = std::mem::take(&mut self.text);
        if text.is_empty() {
            return;
        }
        if let Some(game) = self.current.as_mut() {
            if !apply_game_field(game, tag, &text) {
                add_detail(game, tag, &text);
            }
        } else if self.in_header {
            apply_header_field(&mut self.header, tag, &text);
        }
    }
}

impl DatabaseImporter for XmlDat {
    fn name(&self) -> &'static str {
        "Logiqx XML"
    }

    fn can_import(&self, text: &str) -> bool {
        let head: String = text.trim_start().chars().take(1024).collect();
        head.starts_with('<')
            && (head.contains("<datafile")
                || head.contains("<softwarelist")
                || head.contains("<mame")
                || head.contains("datafile.dtd"))
    }

    fn import(&self, text: &str, _working_folder: &Path) -> Result<GameDatabase> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut state = ImportState::default();
        let mut buf = Vec::new();

        loop {
            let event = match reader.read_event_into(&mut buf) {
                Ok(event) => event,
                Err(e) => {
                    return Err(RomError::malformed(format!(
                        "XML error at position {}: {}",
                        reader.error_position(),
                        e
                    )));
                }
            };

            match event {
                Event::Start(e) => {
                    let tag = tag_name(&e);
                    if tag == "header" {
                        state.in_header = true;
                    } else if is_game_tag(&tag) {
                        state.start_game(&e)?;
                    } else if !state.header_element(&tag, &e)?
                        && !state.child_element(&tag, &e)?
                        && (state.in_header || state.current.is_some())
                    {
                        state.text_target = Some(tag);
                        state.text.clear();
                    }
                }
                Event::Empty(e) => {
                    let tag = tag_name(&e);
                    if is_game_tag(&tag) {
                        state.start_game(&e)?;
                        state.finish_game();
                    } else if !state.header_element(&tag, &e)? {
                        state.child_element(&tag, &e)?;
                    }
                }
                Event::Text(e) => {
                    if state.text_target.is_some() {
                        state.text.push_str(&e.unescape()?);
                    }
                }
                Event::CData(e) => {
                    if state.text_target.is_some() {
                        state.text.push_str(&String::from_utf8_lossy(&e));
                    }
                }
                Event::End(e) => {
                    let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    state.finish_text(&tag);
                    if tag == "header" {
                        state.in_header = false;
                    } else if is_game_tag(&tag) {
                        state.finish_game();
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        let mut db = GameDatabase::new(state.header);
        for game in state.games {
            db.add_game(game)?;
        }
        log::info!("Imported {} games from XML DAT '{}'", db.game_count(), db.header.name);
        Ok(db)
    }
}

fn text_element<W: Write>(writer: &mut Writer<W>, tag: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn empty_element<W: Write>(writer: &mut Writer<W>, tag: &str, fields: &[(&'static str, String)]) -> Result<()> {
    let mut element = BytesStart::new(tag);
    for (key, value) in fields {
        element.push_attribute((*key, value.as_str()));
    }
    writer.write_event(Event::Empty(element))?;
    Ok(())
}

fn write_game<W: Write>(writer: &mut Writer<W>, game: &Game) -> Result<()> {
    let mut start = BytesStart::new("game");
    for (key, value) in game_attributes(game) {
        start.push_attribute((key, value));
    }
    if game.is_bios || game.is_bios_declared {
        start.push_attribute(("isbios", super::yes_no(game.is_bios)));
    }
    writer.write_event(Event::Start(start))?;

    for comment in &game.comments {
        text_element(writer, "comment", comment)?;
    }
    for (tag, value) in [
        ("description", &game.description),
        ("year", &game.year),
        ("manufacturer", &game.manufacturer),
    ] {
        if !value.is_empty() {
            text_element(writer, tag, value)?;
        }
    }
    for release in &game.releases {
        empty_element(writer, "release", &release_fields(release))?;
    }
    for bios in &game.bios_sets {
        empty_element(writer, "biosset", &biosset_fields(bios))?;
    }
    for rom in &game.roms {
        empty_element(writer, "rom", &rom_fields(rom))?;
    }
    for disk in &game.disks {
        empty_element(writer, "disk", &disk_fields(disk))?;
    }
    for sample in &game.samples {
        empty_element(writer, "sample", &[("name", sample.name.clone())])?;
    }
    for archive in &game.archives {
        empty_element(writer, "archive", &[("name", archive.name.clone())])?;
    }
    for (key, value) in &game.details {
        empty_element(
            writer,
            "info",
            &[("name", key.as_str().to_string()), ("value", value.clone())],
        )?;
    }

    writer.write_event(Event::End(BytesEnd::new("game")))?;
    Ok(())
}

impl DatabaseExporter for XmlDat {
    fn export(&self, db: &GameDatabase) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b'\t', 1);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::DocType(BytesText::from_escaped(DOCTYPE)))?;
        writer.write_event(Event::Start(BytesStart::new("datafile")))?;

        writer.write_event(Event::Start(BytesStart::new("header")))?;
        for (tag, value) in header_fields(&db.header) {
            text_element(&mut writer, tag, value)?;
        }
        if let Some(fields) = emulator_fields(&db.header) {
            empty_element(&mut writer, "emulator", &fields)?;
        }
        writer.write_event(Event::End(BytesEnd::new("header")))?;

        for game in db.games() {
            write_game(&mut writer, game)?;
        }

        writer.write_event(Event::End(BytesEnd::new("datafile")))?;
        String::from_utf8(writer.into_inner()).map_err(|e| RomError::malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::to_hex;
    use crate::model::{DetailKey, RomStatus};

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<!DOCTYPE datafile PUBLIC "-//Logiqx//DTD ROM Management Datafile//EN" "http://www.logiqx.com/Dats/datafile.dtd">
<datafile>
  <header>
    <name>Arcade &amp; Co</name>
    <description>Test set</description>
    <version>0.261</version>
    <clrmamepro forcemerging="split"/>
    <emulator name="mame" version="0.261"/>
  </header>
  <game name="neogeo" isbios="yes">
    <description>Neo-Geo</description>
    <biosset name="euro" description="Europe MVS" default="yes"/>
    <rom name="sp-s2.sp1" size="131072" crc="9036d879" sha1="4f5ed7105b7128794654ce82b51723e16e389543"/>
  </game>
  <game name="mslug" romof="neogeo">
    <comment>Metal Slug</comment>
    <description>Metal Slug - Super Vehicle-001</description>
    <year>1996</year>
    <manufacturer>Nazca</manufacturer>
    <release name="mslug" region="EUR" default="yes"/>
    <rom name="201-p1.p1" size="2097152" crc="08d8daa5" status="baddump"/>
    <rom name="sp-s2.sp1" merge="sp-s2.sp1" size="131072" crc="9036d879"/>
    <disk name="mslug-cd" sha1="0102030405060708090a0b0c0d0e0f1011121314"/>
    <info name="region" value="World"/>
    <genre>Shooter</genre>
  </game>
  <game name="notbios" isbios="no">
    <rom name="n.bin" size="4" crc="01020304"/>
  </game>
  <machine name="cloned" cloneof="mslug" romof="mslug">
    <rom name="c.bin" size="0x10" crc="0xABCDEF01"/>
  </machine>
</datafile>"#;

    fn sample() -> GameDatabase {
        XmlDat.import(SAMPLE, Path::new(".")).unwrap()
    }

    #[test]
    fn test_parse_header_and_games() {
        let db = sample();
        assert_eq!(db.header.name, "Arcade & Co");
        assert_eq!(db.header.version, "0.261");
        assert_eq!(db.header.emulator_name, "mame");
        assert_eq!(db.header.emulator_version, "0.261");
        assert_eq!(db.game_count(), 4);

        let bios = db.game(db.find_game("neogeo").unwrap());
        assert!(bios.is_bios);
        assert_eq!(bios.bios_sets[0].name, "euro");
        assert!(bios.bios_sets[0].is_default);
    }

    #[test]
    fn test_parse_game_children() {
        let db = sample();
        let game = db.game(db.find_game("mslug").unwrap());
        assert_eq!(game.rom_of.as_deref(), Some("neogeo"));
        assert_eq!(game.year, "1996");
        assert_eq!(game.comments, vec!["Metal Slug".to_string()]);
        assert_eq!(game.releases[0].region, "EUR");
        assert_eq!(game.roms.len(), 2);
        assert_eq!(game.roms[0].status, RomStatus::BadDump);
        assert!(game.roms[1].is_inherited());
        assert_eq!(to_hex(&game.disks[0].sha1), "0102030405060708090a0b0c0d0e0f1011121314");
        assert_eq!(game.details.get(&DetailKey::new("region")).map(String::as_str), Some("World"));
        assert_eq!(game.details.get(&DetailKey::new("genre")).map(String::as_str), Some("Shooter"));

        let clone = db.game(db.find_game("cloned").unwrap());
        assert_eq!(clone.clone_of.as_deref(), Some("mslug"));
        assert_eq!(clone.roms[0].size, 16);
        assert_eq!(to_hex(&clone.roms[0].checksums.crc32), "abcdef01");
    }

    #[test]
    fn test_duplicate_game_is_malformed() {
        let xml = r#"<datafile><game name="a"><rom name="x" size="1"/></game><game name="a"/></datafile>"#;
        let err = XmlDat.import(xml, Path::new(".")).unwrap_err();
        assert!(matches!(err, RomError::MalformedDat(_)));
    }

    #[test]
    fn test_unknown_status_is_malformed() {
        let xml = r#"<datafile><game name="a"><rom name="x" size="1" status="melted"/></game></datafile>"#;
        assert!(matches!(
            XmlDat.import(xml, Path::new(".")),
            Err(RomError::MalformedDat(_))
        ));
    }

    #[test]
    fn test_export_uses_logiqx_conventions() {
        let text = XmlDat.export(&sample()).unwrap();
        assert!(text.contains("<!DOCTYPE datafile PUBLIC"));
        assert!(text.contains(r#"isbios="yes""#));
        assert!(text.contains(r#"<game name="notbios" isbios="no">"#));
        assert!(text.contains(r#"<emulator name="mame" version="0.261"/>"#));
        assert!(!text.contains(r#"<game name="mslug" isbios"#));
        assert!(text.contains(r#"default="yes""#));
        assert!(text.contains(r#"status="baddump""#));
        assert!(text.contains(r#"crc="9036d879""#));
        assert!(text.contains("Arcade &amp; Co"));
    }

    #[test]
    fn test_export_reimports_identically() {
        let db = sample();
        let text = XmlDat.export(&db).unwrap();
        assert!(XmlDat.can_import(&text));
        let again = XmlDat.import(&text, Path::new(".")).unwrap();
        assert_eq!(again.header, db.header);
        assert_eq!(again.games(), db.games());
    }
}
