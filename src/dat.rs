use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::{Error, Result};

/// Fields lifted from the `<header>` block of a Logiqx or MAME DAT.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatHeader {
    pub name: String,
    pub description: Option<String>,
    pub version: Option<String>,
    pub date: Option<String>,
    pub author: Option<String>,
    pub homepage: Option<String>,
    pub url: Option<String>,
}

/// One declared rom file inside a game element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatRomDecl {
    pub name: String,
    pub size: Option<u64>,
    pub crc: Option<String>,
    pub md5: Option<String>,
    pub sha1: Option<String>,
}

/// One `<game>` or `<machine>` element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatGame {
    pub name: String,
    pub id: Option<String>,
    pub clone_of: Option<String>,
    pub clone_of_id: Option<String>,
    pub rom_of: Option<String>,
    pub sample_of: Option<String>,
    pub is_bios: bool,
    pub is_device: bool,
    pub is_mechanical: bool,
    pub runnable: Option<bool>,
    pub source_file: Option<String>,
    pub description: Option<String>,
    pub year: Option<String>,
    pub manufacturer: Option<String>,
    pub roms: Vec<DatRomDecl>,
}

type XmlReader = Reader<BufReader<File>>;

/// Streaming DAT consumer: the header is parsed eagerly, games are produced
/// one at a time so multi-gigabyte MAME files never sit in memory whole.
/// Numeric `cloneofid` references are resolved to `cloneof` names through an
/// id index built in a preliminary attribute-only pass over the same file.
pub struct DatReader {
    reader: XmlReader,
    buf: Vec<u8>,
    path: PathBuf,
    header: DatHeader,
    id_to_name: HashMap<String, String>,
    pending: Option<DatGame>,
    done: bool,
}

impl DatReader {
    pub fn open(path: &Path) -> Result<DatReader> {
        let id_to_name = build_id_index(path)?;
        let mut dat = DatReader {
            reader: open_xml(path)?,
            buf: Vec::new(),
            path: path.to_path_buf(),
            header: DatHeader::default(),
            id_to_name,
            pending: None,
            done: false,
        };
        dat.read_prologue()?;
        Ok(dat)
    }

    pub fn header(&self) -> &DatHeader {
        &self.header
    }

    /// Next game element, or `None` at end of file.
    pub fn next_game(&mut self) -> Result<Option<DatGame>> {
        if let Some(game) = self.pending.take() {
            return Ok(Some(game));
        }
        if self.done {
            return Ok(None);
        }
        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf) {
                Ok(Event::Start(e)) if is_game_tag(e.name().as_ref()) => {
                    let mut game = game_from_attrs(&e, &self.path)?;
                    read_game_children(&mut self.reader, &self.path, &mut game)?;
                    self.resolve_clone_id(&mut game);
                    return Ok(Some(game));
                }
                Ok(Event::Empty(e)) if is_game_tag(e.name().as_ref()) => {
                    let mut game = game_from_attrs(&e, &self.path)?;
                    self.resolve_clone_id(&mut game);
                    return Ok(Some(game));
                }
                Ok(Event::Eof) => {
                    self.done = true;
                    return Ok(None);
                }
                Ok(_) => {}
                Err(e) => return Err(Error::parse(&self.path, e.to_string())),
            }
        }
    }

    /// Header block plus everything up to (and including) the first game,
    /// which is stashed for the first `next_game` call.
    fn read_prologue(&mut self) -> Result<()> {
        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf) {
                Ok(Event::Start(e)) if e.name().as_ref() == b"header" => {
                    self.header = read_header_children(&mut self.reader, &self.path)?;
                }
                Ok(Event::Start(e)) if is_game_tag(e.name().as_ref()) => {
                    let mut game = game_from_attrs(&e, &self.path)?;
                    read_game_children(&mut self.reader, &self.path, &mut game)?;
                    self.resolve_clone_id(&mut game);
                    self.pending = Some(game);
                    return Ok(());
                }
                Ok(Event::Empty(e)) if is_game_tag(e.name().as_ref()) => {
                    let mut game = game_from_attrs(&e, &self.path)?;
                    self.resolve_clone_id(&mut game);
                    self.pending = Some(game);
                    return Ok(());
                }
                Ok(Event::Eof) => {
                    self.done = true;
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => return Err(Error::parse(&self.path, e.to_string())),
            }
        }
    }

    fn resolve_clone_id(&self, game: &mut DatGame) {
        if game.clone_of.is_some() {
            return;
        }
        if let Some(id) = game.clone_of_id.as_deref() {
            if let Some(parent) = self.id_to_name.get(id) {
                if *parent != game.name {
                    game.clone_of = Some(parent.clone());
                }
            }
        }
    }
}

fn open_xml(path: &Path) -> Result<XmlReader> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut reader = Reader::from_reader(BufReader::new(file));
    reader.config_mut().trim_text(true);
    Ok(reader)
}

fn is_game_tag(name: &[u8]) -> bool {
    name == b"game" || name == b"machine"
}

/// Attribute-only pass collecting the game id -> name table used to resolve
/// `cloneofid` references.
fn build_id_index(path: &Path) -> Result<HashMap<String, String>> {
    let mut reader = open_xml(path)?;
    let mut buf = Vec::new();
    let mut index = HashMap::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if is_game_tag(e.name().as_ref()) => {
                let mut id = None;
                let mut name = None;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"id" => id = Some(attr_value(&attr)),
                        b"name" => name = Some(attr_value(&attr)),
                        _ => {}
                    }
                }
                if let (Some(id), Some(name)) = (id, name) {
                    index.insert(id, name);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(Error::parse(path, e.to_string())),
        }
    }
    Ok(index)
}

fn attr_value(attr: &quick_xml::events::attributes::Attribute<'_>) -> String {
    String::from_utf8_lossy(&attr.value).into_owned()
}

fn yes(value: &str) -> bool {
    value.eq_ignore_ascii_case("yes")
}

fn game_from_attrs(e: &BytesStart<'_>, path: &Path) -> Result<DatGame> {
    let mut game = DatGame::default();
    for attr in e.attributes().flatten() {
        let value = attr_value(&attr);
        match attr.key.as_ref() {
            b"name" => game.name = value,
            b"id" => game.id = Some(value),
            b"cloneof" => game.clone_of = Some(value),
            b"cloneofid" => game.clone_of_id = Some(value),
            b"romof" => game.rom_of = Some(value),
            b"sampleof" => game.sample_of = Some(value),
            b"isbios" => game.is_bios = yes(&value),
            b"isdevice" => game.is_device = yes(&value),
            b"ismechanical" => game.is_mechanical = yes(&value),
            b"runnable" => game.runnable = Some(yes(&value)),
            b"sourcefile" => game.source_file = Some(value),
            _ => {}
        }
    }
    if game.name.is_empty() {
        return Err(Error::parse(path, "game element without a name attribute"));
    }
    // A cloneof pointing at itself is meaningless; drop it.
    if game.clone_of.as_deref() == Some(game.name.as_str()) {
        game.clone_of = None;
    }
    Ok(game)
}

fn rom_from_attrs(e: &BytesStart<'_>, path: &Path) -> Result<DatRomDecl> {
    let mut rom = DatRomDecl::default();
    for attr in e.attributes().flatten() {
        let value = attr_value(&attr);
        match attr.key.as_ref() {
            b"name" => rom.name = value,
            b"size" => {
                let size = value
                    .parse::<u64>()
                    .map_err(|_| Error::parse(path, format!("non-numeric rom size {value:?}")))?;
                rom.size = Some(size);
            }
            b"crc" => rom.crc = Some(value.to_ascii_lowercase()),
            b"md5" => rom.md5 = Some(value.to_ascii_lowercase()),
            b"sha1" => rom.sha1 = Some(value.to_ascii_lowercase()),
            _ => {}
        }
    }
    Ok(rom)
}

fn read_game_children(reader: &mut XmlReader, path: &Path, game: &mut DatGame) -> Result<()> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) if e.name().as_ref() == b"rom" => {
                game.roms.push(rom_from_attrs(&e, path)?);
            }
            Ok(Event::Start(e)) if e.name().as_ref() == b"rom" => {
                let rom = rom_from_attrs(&e, path)?;
                skip_to_end(reader, path, b"rom")?;
                game.roms.push(rom);
            }
            Ok(Event::Start(e)) if e.name().as_ref() == b"description" => {
                game.description = Some(read_element_text(reader, path, b"description")?);
            }
            Ok(Event::Start(e)) if e.name().as_ref() == b"year" => {
                game.year = Some(read_element_text(reader, path, b"year")?);
            }
            Ok(Event::Start(e)) if e.name().as_ref() == b"manufacturer" => {
                game.manufacturer = Some(read_element_text(reader, path, b"manufacturer")?);
            }
            Ok(Event::End(e)) if is_game_tag(e.name().as_ref()) => return Ok(()),
            Ok(Event::Eof) => {
                return Err(Error::parse(path, "unexpected end of file inside game"));
            }
            Ok(_) => {}
            Err(e) => return Err(Error::parse(path, e.to_string())),
        }
    }
}

fn read_header_children(reader: &mut XmlReader, path: &Path) -> Result<DatHeader> {
    let mut header = DatHeader::default();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag = e.name().as_ref().to_vec();
                let text = read_element_text(reader, path, &tag)?;
                match tag.as_slice() {
                    b"name" => header.name = text,
                    b"description" => header.description = Some(text),
                    b"version" => header.version = Some(text),
                    b"date" => header.date = Some(text),
                    b"author" => header.author = Some(text),
                    b"homepage" => header.homepage = Some(text),
                    b"url" => header.url = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"header" => return Ok(header),
            Ok(Event::Eof) => return Err(Error::parse(path, "unexpected end of file in header")),
            Ok(_) => {}
            Err(e) => return Err(Error::parse(path, e.to_string())),
        }
    }
}

/// Accumulated text content up to the matching end tag.
fn read_element_text(reader: &mut XmlReader, path: &Path, end: &[u8]) -> Result<String> {
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Text(t)) => {
                let piece = t
                    .unescape()
                    .map_err(|e| Error::parse(path, e.to_string()))?;
                text.push_str(&piece);
            }
            Ok(Event::End(e)) if e.name().as_ref() == end => return Ok(text),
            Ok(Event::Eof) => return Err(Error::parse(path, "unexpected end of file in element")),
            Ok(_) => {}
            Err(e) => return Err(Error::parse(path, e.to_string())),
        }
    }
}

fn skip_to_end(reader: &mut XmlReader, path: &Path, end: &[u8]) -> Result<()> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::End(e)) if e.name().as_ref() == end => return Ok(()),
            Ok(Event::Eof) => return Err(Error::parse(path, "unexpected end of file")),
            Ok(_) => {}
            Err(e) => return Err(Error::parse(path, e.to_string())),
        }
    }
}
