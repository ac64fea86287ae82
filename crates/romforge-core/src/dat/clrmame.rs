use super::{
    DatabaseExporter, DatabaseImporter, add_detail, apply_biosset_field, apply_disk_field, apply_emulator_field,
    apply_game_field, apply_header_field, apply_release_field, apply_rom_field, biosset_fields, disk_fields,
    emulator_fields, game_attributes, header_fields, release_fields, rom_fields, yes_no,
};
use crate::error::{Result, RomError};
use crate::model::{
    BiosSet, DatabaseHeader, Game, GameDatabase, Release, RomArchive, RomDisk, RomFile, RomSample,
};
use std::fmt::Write as _;
use std::path::Path;

/// ClrMamePro line-oriented DAT files:
///
/// ```text
/// clrmamepro (
///     name "System Name"
/// )
///
/// game (
///     name "Game"
///     rom ( name "Game.bin" size 12345 crc aabbccdd )
/// )
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ClrMameDat;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Word(String),
}

/// Split into parentheses and words, respecting quoted strings.
///
/// Inside quotes `\"` and `\\` stand for a quote and a backslash; any other
/// backslash is kept as is.
fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' => {
                chars.next();
                let mut word = String::new();
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' if matches!(chars.peek(), Some('"' | '\\')) => {
                            word.extend(chars.next());
                        }
                        _ => word.push(c),
                    }
                }
                tokens.push(Token::Word(word));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }

    tokens
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Text(String),
    Block(Vec<(String, Value)>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    /// Entries up to the closing parenthesis, or end of input at the top level.
    fn entries(&mut self, top_level: bool) -> Result<Vec<(String, Value)>> {
        let mut entries = Vec::new();
        loop {
            let key = match self.next() {
                None if top_level => return Ok(entries),
                None => return Err(RomError::malformed("unexpected end of DAT inside a block")),
                Some(Token::Close) if !top_level => return Ok(entries),
                Some(Token::Close) => return Err(RomError::malformed("unbalanced ')' in DAT")),
                Some(Token::Open) => return Err(RomError::malformed("'(' without a key in DAT")),
                Some(Token::Word(key)) => key,
            };
            let value = match self.next() {
                Some(Token::Open) => Value::Block(self.entries(false)?),
                Some(Token::Word(text)) => Value::Text(text),
                _ => return Err(RomError::malformed(format!("key '{}' has no value", key))),
            };
            entries.push((key.to_ascii_lowercase(), value));
        }
    }
}

fn text_fields(block: &[(String, Value)]) -> impl Iterator<Item = (&str, &str)> {
    block.iter().filter_map(|(key, value)| match value {
        Value::Text(text) => Some((key.as_str(), text.as_str())),
        Value::Block(_) => None,
    })
}

fn parse_game(block: &[(String, Value)], is_resource: bool) -> Result<Game> {
    let mut game = Game {
        is_bios: is_resource,
        ..Game::default()
    };

    for (key, value) in block {
        match value {
            Value::Text(text) => {
                if key == "sample" {
                    game.samples.push(RomSample { name: text.clone() });
                } else if !apply_game_field(&mut game, key, text) {
                    add_detail(&mut game, key, text);
                }
            }
            Value::Block(inner) => match key.as_str() {
                "rom" => {
                    let mut rom = RomFile::default();
                    for (k, v) in text_fields(inner) {
                        apply_rom_field(&mut rom, k, v)?;
                    }
                    game.roms.push(rom);
                }
                "disk" => {
                    let mut disk = RomDisk::default();
                    for (k, v) in text_fields(inner) {
                        apply_disk_field(&mut disk, k, v)?;
                    }
                    game.disks.push(disk);
                }
                "release" => {
                    let mut release = Release::default();
                    for (k, v) in text_fields(inner) {
                        apply_release_field(&mut release, k, v);
                    }
                    game.releases.push(release);
                }
                "biosset" => {
                    let mut bios = BiosSet::default();
                    for (k, v) in text_fields(inner) {
                        apply_biosset_field(&mut bios, k, v);
                    }
                    game.bios_sets.push(bios);
                }
                "sample" | "archive" => {
                    let name = text_fields(inner)
                        .find(|(k, _)| *k == "name")
                        .map(|(_, v)| v.to_string())
                        .unwrap_or_default();
                    if key == "sample" {
                        game.samples.push(RomSample { name });
                    } else {
                        game.archives.push(RomArchive { name });
                    }
                }
                "info" => {
                    let lookup = |field: &str| {
                        text_fields(inner)
                            .find(|(k, _)| *k == field)
                            .map(|(_, v)| v)
                            .unwrap_or_default()
                    };
                    add_detail(&mut game, lookup("name"), lookup("value"));
                }
                other => log::debug!("Ignoring '{}' block in game {}", other, game.name),
            },
        }
    }
    Ok(game)
}

impl DatabaseImporter for ClrMameDat {
    fn name(&self) -> &'static str {
        "ClrMamePro"
    }

    fn can_import(&self, text: &str) -> bool {
        let head: String = text.trim_start().chars().take(256).collect();
        let tokens = tokenize(&head);
        matches!(
            tokens.as_slice(),
            [Token::Word(key), Token::Open, ..]
                if matches!(key.to_ascii_lowercase().as_str(), "clrmamepro" | "game" | "machine" | "resource")
        )
    }

    fn import(&self, text: &str, _working_folder: &Path) -> Result<GameDatabase> {
        let mut parser = Parser {
            tokens: tokenize(text),
            pos: 0,
        };
        let entries = parser.entries(true)?;

        let mut header = DatabaseHeader::default();
        let mut games = Vec::new();
        for (key, value) in &entries {
            let Value::Block(block) = value else {
                return Err(RomError::malformed(format!("top-level '{}' is not a block", key)));
            };
            match key.as_str() {
                "clrmamepro" => {
                    for (k, v) in text_fields(block) {
                        apply_header_field(&mut header, k, v);
                    }
                }
                "emulator" => {
                    for (k, v) in text_fields(block) {
                        apply_emulator_field(&mut header, k, v);
                    }
                }
                "game" | "machine" => games.push(parse_game(block, false)?),
                "resource" => games.push(parse_game(block, true)?),
                other => log::debug!("Ignoring top-level '{}' block", other),
            }
        }

        let mut db = GameDatabase::new(header);
        for game in games {
            db.add_game(game)?;
        }
        log::info!("Imported {} games from ClrMamePro DAT '{}'", db.game_count(), db.header.name);
        Ok(db)
    }
}

/// Quote everything except plain numbers and hex digests.
fn quoted(key: &str, value: &str) -> String {
    let bare = matches!(key, "size" | "crc" | "md5" | "sha1" | "sha256" | "default")
        && !value.is_empty()
        && value.chars().all(|c| c.is_ascii_alphanumeric());
    if bare {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

fn inline_block(out: &mut String, tag: &str, fields: &[(&'static str, String)]) {
    let body: Vec<String> = fields
        .iter()
        .map(|(key, value)| format!("{} {}", key, quoted(key, value)))
        .collect();
    let _ = writeln!(out, "\t{} ( {} )", tag, body.join(" "));
}

fn write_game(out: &mut String, game: &Game) {
    out.push_str(if game.is_bios { "resource (\n" } else { "game (\n" });

    for (key, value) in game_attributes(game) {
        let _ = writeln!(out, "\t{} {}", key, quoted(key, value));
    }
    if game.is_bios_declared {
        let _ = writeln!(out, "\tisbios {}", yes_no(game.is_bios));
    }
    for comment in &game.comments {
        let _ = writeln!(out, "\tcomment {}", quoted("comment", comment));
    }
    for (key, value) in [
        ("description", &game.description),
        ("year", &game.year),
        ("manufacturer", &game.manufacturer),
    ] {
        if !value.is_empty() {
            let _ = writeln!(out, "\t{} {}", key, quoted(key, value));
        }
    }
    for release in &game.releases {
        inline_block(out, "release", &release_fields(release));
    }
    for bios in &game.bios_sets {
        inline_block(out, "biosset", &biosset_fields(bios));
    }
    for rom in &game.roms {
        inline_block(out, "rom", &rom_fields(rom));
    }
    for disk in &game.disks {
        inline_block(out, "disk", &disk_fields(disk));
    }
    for sample in &game.samples {
        let _ = writeln!(out, "\tsample {}", quoted("name", &sample.name));
    }
    for archive in &game.archives {
        inline_block(out, "archive", &[("name", archive.name.clone())]);
    }
    for (key, value) in &game.details {
        inline_block(
            out,
            "info",
            &[("name", key.as_str().to_string()), ("value", value.clone())],
        );
    }

    out.push_str(")\n\n");
}

impl DatabaseExporter for ClrMameDat {
    fn export(&self, db: &GameDatabase) -> Result<String> {
        let mut out = String::from("clrmamepro (\n");
        for (key, value) in header_fields(&db.header) {
            let _ = writeln!(out, "\t{} {}", key, quoted(key, value));
        }
        out.push_str(")\n\n");

        if let Some(fields) = emulator_fields(&db.header) {
            out.push_str("emulator (\n");
            for (key, value) in &fields {
                let _ = writeln!(out, "\t{} {}", key, quoted(key, value));
            }
            out.push_str(")\n\n");
        }

        for game in db.games() {
            write_game(&mut out, game);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::to_hex;
    use crate::model::RomStatus;

    const SAMPLE: &str = r#"clrmamepro (
	name "Nintendo - Game Boy"
	description "Nintendo - Game Boy (20240101)"
	version 20240101
)

emulator (
	name "gambatte"
	version "r571"
)

game (
	name "Tetris (World)"
	description "Tetris \"Original\" (World)"
	rom ( name "Tetris (World).gb" size 32768 crc 46DF91AD md5 982ED5D2B12A0377EB14BCDC4123744E sha1 74591CC9501AF93873F9A5D3EB12DA12C0723BBC )
)

resource (
	name "gbbios"
	rom ( name "dmg_boot.bin" size 256 crc 59c8598e status verified )
)

game (
	name "Tetris (Rev 1)"
	cloneof "Tetris (World)"
	romof "Tetris (World)"
	rom ( name "Tetris (World).gb" merge "Tetris (World).gb" size 32768 crc 46df91ad )
	disk ( name "extra" sha1 0102030405060708090a0b0c0d0e0f1011121314 )
	sample "jump"
	genre "Puzzle"
)

game (
	name "Plain"
	isbios no
	rom ( name "plain.gb" size 4 crc 01020304 )
)
"#;

    fn sample() -> GameDatabase {
        ClrMameDat.import(SAMPLE, Path::new(".")).unwrap()
    }

    #[test]
    fn test_tokenize_quoted_words() {
        assert_eq!(
            tokenize(r#"rom ( name "A (B).bin" size 1 )"#),
            vec![
                Token::Word("rom".into()),
                Token::Open,
                Token::Word("name".into()),
                Token::Word("A (B).bin".into()),
                Token::Word("size".into()),
                Token::Word("1".into()),
                Token::Close,
            ]
        );
    }

    #[test]
    fn test_tokenize_escaped_quotes() {
        assert_eq!(
            tokenize(r#"description "a \"b\" c\\" path "x\y""#),
            vec![
                Token::Word("description".into()),
                Token::Word(r#"a "b" c\"#.into()),
                Token::Word("path".into()),
                Token::Word(r"x\y".into()),
            ]
        );
    }

    #[test]
    fn test_parse_header_and_games() {
        let db = sample();
        assert_eq!(db.header.name, "Nintendo - Game Boy");
        assert_eq!(db.header.version, "20240101");
        assert_eq!(db.header.emulator_name, "gambatte");
        assert_eq!(db.header.emulator_version, "r571");
        assert_eq!(db.game_count(), 4);

        let tetris = db.game(db.find_game("Tetris (World)").unwrap());
        assert_eq!(tetris.description, r#"Tetris "Original" (World)"#);
        assert_eq!(tetris.roms[0].size, 32768);
        assert_eq!(to_hex(&tetris.roms[0].checksums.crc32), "46df91ad");
        assert_eq!(to_hex(&tetris.roms[0].checksums.md5), "982ed5d2b12a0377eb14bcdc4123744e");

        let bios = db.game(db.find_game("gbbios").unwrap());
        assert!(bios.is_bios);
        assert_eq!(bios.roms[0].status, RomStatus::Verified);
    }

    #[test]
    fn test_parse_clone_fields() {
        let db = sample();
        let clone = db.game(db.find_game("Tetris (Rev 1)").unwrap());
        assert_eq!(clone.clone_of.as_deref(), Some("Tetris (World)"));
        assert!(clone.roms[0].is_inherited());
        assert_eq!(clone.disks[0].name, "extra");
        assert_eq!(clone.samples[0].name, "jump");
        assert_eq!(clone.details.values().next().map(String::as_str), Some("Puzzle"));
    }

    #[test]
    fn test_structural_errors_are_malformed() {
        for text in [
            "game ( name \"a\" rom ( name \"x\" size 1 )",
            "game ( name \"a\" ) )",
            "game ( name \"a\" rom ( size lots ) )",
            "game ( name \"a\" ) game ( name \"a\" )",
        ] {
            assert!(
                matches!(ClrMameDat.import(text, Path::new(".")), Err(RomError::MalformedDat(_))),
                "{}",
                text
            );
        }
    }

    #[test]
    fn test_can_import_sniffs_leading_block() {
        assert!(ClrMameDat.can_import("\n  clrmamepro (\n"));
        assert!(ClrMameDat.can_import("game ( name x )"));
        assert!(!ClrMameDat.can_import("<?xml version=\"1.0\"?>"));
        assert!(!ClrMameDat.can_import("name ( x )"));
    }

    #[test]
    fn test_export_reimports_identically() {
        let db = sample();
        let text = ClrMameDat.export(&db).unwrap();
        assert!(text.starts_with("clrmamepro ("));
        assert!(text.contains("resource ("));
        assert!(text.contains("crc 46df91ad"));
        assert!(text.contains(r#"description "Tetris \"Original\" (World)""#));
        assert!(text.contains("isbios no"));
        assert!(text.contains("emulator (\n\tname \"gambatte\""));

        let again = ClrMameDat.import(&text, Path::new(".")).unwrap();
        assert_eq!(again.header, db.header);
        assert_eq!(again.games(), db.games());
    }
}
