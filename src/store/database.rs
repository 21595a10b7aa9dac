//! XML load/save of the full chip record set.

use super::{ChipRecord, DistanceWindow, StoreError};
use crate::bits::Signature;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// All chip records, keyed and iterated by chip name.
#[derive(Debug, Clone, PartialEq)]
pub struct ChipDatabase {
    records: BTreeMap<String, ChipRecord>,
    n_bits: usize,
    capacity: usize,
}

impl ChipDatabase {
    /// Creates an empty database for `n_bits`-long signatures.
    pub fn new(n_bits: usize, capacity: usize) -> Self {
        Self {
            records: BTreeMap::new(),
            n_bits,
            capacity: capacity.max(1),
        }
    }

    /// Reads and parses the document at `path`.
    ///
    /// A missing file surfaces as [`StoreError::Io`]; whether that means
    /// "start empty" is up to the caller.
    pub fn load(path: impl AsRef<Path>, n_bits: usize, capacity: usize) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let db = Self::from_xml(&text, n_bits, capacity)?;
        tracing::debug!(
            path = %path.display(),
            chips = db.len(),
            "Loaded signature database"
        );
        Ok(db)
    }

    /// Writes every record to `path`, sorted by chip name.
    ///
    /// The document is written to a sibling temporary file and renamed
    /// into place, so readers see either the old or the new file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let document = self.to_xml()?;
        let temp_path = temp_path_for(path);
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(document.as_bytes())?;
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, path)?;

        if let Some(parent) = path.parent() {
            if let Ok(dir) = fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        tracing::info!(
            path = %path.display(),
            chips = self.len(),
            "Saved signature database"
        );
        Ok(())
    }

    /// Serializes the database to an XML document.
    pub fn to_xml(&self) -> Result<String, StoreError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b'\t', 1);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::Start(BytesStart::new("chip_list")))?;

        for (name, record) in &self.records {
            let meas_count = record.meas_count.to_string();
            writer.write_event(Event::Start(BytesStart::new("chip").with_attributes([
                ("name", name.as_str()),
                ("meas_count", meas_count.as_str()),
            ])))?;

            write_hex(&mut writer, "sig", &record.signature)?;

            if !record.noise.is_empty() {
                writer.write_event(Event::Start(BytesStart::new("noise")))?;
                write_distances(&mut writer, &record.noise)?;
                writer.write_event(Event::End(BytesEnd::new("noise")))?;
            }

            if !record.inter_chip.is_empty() {
                writer.write_event(Event::Start(BytesStart::new("inter_chip")))?;
                for (other, window) in &record.inter_chip {
                    writer.write_event(Event::Start(
                        BytesStart::new("other").with_attributes([("name", other.as_str())]),
                    ))?;
                    write_distances(&mut writer, window)?;
                    writer.write_event(Event::End(BytesEnd::new("other")))?;
                }
                writer.write_event(Event::End(BytesEnd::new("inter_chip")))?;
            }

            if let Some(unstable) = &record.unstable_bits {
                write_hex(&mut writer, "unstable_bits", unstable)?;
            }

            writer.write_event(Event::End(BytesEnd::new("chip")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("chip_list")))?;

        let mut bytes = writer.into_inner();
        bytes.push(b'\n');
        String::from_utf8(bytes).map_err(|e| StoreError::Format(e.to_string()))
    }

    /// Parses an XML document into a database.
    pub fn from_xml(text: &str, n_bits: usize, capacity: usize) -> Result<Self, StoreError> {
        let mut parser = Parser::new(Self::new(n_bits, capacity));
        let mut reader = Reader::from_str(text);
        reader.trim_text(true);

        loop {
            match reader.read_event()? {
                Event::Start(e) => {
                    let element = parser.open(&e)?;
                    parser.stack.push(element);
                }
                Event::Empty(e) => {
                    let element = parser.open(&e)?;
                    parser.close(element)?;
                }
                Event::End(_) => {
                    let element = parser.stack.pop().ok_or_else(|| {
                        format_error(format!(
                            "unbalanced closing tag at byte {}",
                            reader.buffer_position()
                        ))
                    })?;
                    parser.close(element)?;
                }
                Event::Text(t) => {
                    let text = t.unescape()?;
                    parser.text(&text)?;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !parser.seen_root {
            return Err(format_error("missing <chip_list> root element"));
        }
        if !parser.stack.is_empty() {
            return Err(format_error("document ended inside an open element"));
        }
        Ok(parser.db)
    }

    /// Expected signature length in bits.
    #[inline]
    pub fn n_bits(&self) -> usize {
        self.n_bits
    }

    /// Capacity of every distance window.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of enrolled chips.
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no chip is enrolled.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Looks up a record.
    pub fn get(&self, name: &str) -> Option<&ChipRecord> {
        self.records.get(name)
    }

    /// Returns the record for `name`, enrolling `signature` under that
    /// name first if the chip is unknown. The flag is true when the
    /// record already existed.
    pub(crate) fn entry_or_enroll(&mut self, name: &str, signature: &Signature) -> (&mut ChipRecord, bool) {
        let capacity = self.capacity;
        match self.records.entry(name.to_string()) {
            btree_map::Entry::Occupied(entry) => (entry.into_mut(), true),
            btree_map::Entry::Vacant(entry) => {
                (entry.insert(ChipRecord::enrolled(signature.clone(), capacity)), false)
            }
        }
    }

    /// Inserts or replaces a record.
    pub fn insert(&mut self, name: impl Into<String>, record: ChipRecord) -> Option<ChipRecord> {
        self.records.insert(name.into(), record)
    }

    /// Iterates records in name order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, ChipRecord> {
        self.records.iter()
    }

    /// Chip names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.records.keys().map(String::as_str)
    }

    /// Removes every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "signatures.xml".into());
    name.push(".tmp");
    path.with_file_name(name)
}

fn format_error(message: impl Into<String>) -> StoreError {
    StoreError::Format(message.into())
}

fn write_hex(writer: &mut Writer<Vec<u8>>, tag: &str, bits: &Signature) -> Result<(), StoreError> {
    let hex = bits.to_hex();
    writer.write_event(Event::Start(
        BytesStart::new(tag).with_attributes([("encoding", "hex")]),
    ))?;
    writer.write_event(Event::Text(BytesText::new(&hex)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn write_distances(writer: &mut Writer<Vec<u8>>, window: &DistanceWindow) -> Result<(), StoreError> {
    for dist in window.iter() {
        let text = dist.to_string();
        writer.write_event(Event::Start(BytesStart::new("dist")))?;
        writer.write_event(Event::Text(BytesText::new(&text)))?;
        writer.write_event(Event::End(BytesEnd::new("dist")))?;
    }
    Ok(())
}

/// Elements of the document schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Element {
    ChipList,
    Chip,
    Sig,
    Noise,
    NoiseDist,
    InterChip,
    Other,
    OtherDist,
    UnstableBits,
}

/// A `<chip>` whose closing tag has not been seen yet.
struct PendingChip {
    name: String,
    meas_count: u64,
    signature: Option<Signature>,
    noise: Vec<usize>,
    inter_chip: BTreeMap<String, Vec<usize>>,
    current_other: Option<String>,
    unstable_bits: Option<Signature>,
}

struct Parser {
    db: ChipDatabase,
    stack: Vec<Element>,
    chip: Option<PendingChip>,
    seen_root: bool,
}

impl Parser {
    fn new(db: ChipDatabase) -> Self {
        Self {
            db,
            stack: Vec::new(),
            chip: None,
            seen_root: false,
        }
    }

    /// Validates an opening tag against its parent and returns the
    /// element it starts.
    fn open(&mut self, e: &BytesStart<'_>) -> Result<Element, StoreError> {
        let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let parent = self.stack.last().copied();

        let element = match (parent, tag.as_str()) {
            (None, "chip_list") if !self.seen_root => {
                self.seen_root = true;
                Element::ChipList
            }
            (None, _) => {
                return Err(format_error(format!(
                    "expected a single <chip_list> root element, found <{tag}>"
                )))
            }
            (Some(Element::ChipList), "chip") => {
                let name = required_attr(e, "name")?;
                let meas_count = match optional_attr(e, "meas_count")? {
                    Some(count) => count.trim().parse().map_err(|_| {
                        format_error(format!("chip '{name}' has invalid meas_count '{count}'"))
                    })?,
                    None => 1,
                };
                self.chip = Some(PendingChip {
                    name,
                    meas_count,
                    signature: None,
                    noise: Vec::new(),
                    inter_chip: BTreeMap::new(),
                    current_other: None,
                    unstable_bits: None,
                });
                Element::Chip
            }
            (Some(Element::ChipList), _) => {
                return Err(format_error(format!(
                    "<chip_list> must contain only <chip> elements, found <{tag}>"
                )))
            }
            (Some(Element::Chip), "sig") => {
                require_hex_encoding(e)?;
                Element::Sig
            }
            (Some(Element::Chip), "noise") => Element::Noise,
            (Some(Element::Chip), "inter_chip") => Element::InterChip,
            (Some(Element::Chip), "unstable_bits") => {
                require_hex_encoding(e)?;
                Element::UnstableBits
            }
            (Some(Element::Chip), _) => {
                return Err(format_error(format!("unsupported tag <{tag}> under <chip>")))
            }
            (Some(Element::Noise), "dist") => Element::NoiseDist,
            (Some(Element::Noise), _) => {
                return Err(format_error(format!("tags under <noise> must be <dist>, found <{tag}>")))
            }
            (Some(Element::InterChip), "other") => {
                let other = required_attr(e, "name")?;
                let chip = self.chip_mut()?;
                chip.inter_chip.entry(other.clone()).or_default();
                chip.current_other = Some(other);
                Element::Other
            }
            (Some(Element::InterChip), _) => {
                return Err(format_error(format!(
                    "tags under <inter_chip> must be <other>, found <{tag}>"
                )))
            }
            (Some(Element::Other), "dist") => Element::OtherDist,
            (Some(Element::Other), _) => {
                return Err(format_error(format!("tags under <other> must be <dist>, found <{tag}>")))
            }
            (Some(leaf), _) => {
                return Err(format_error(format!("unexpected <{tag}> inside {leaf:?}")))
            }
        };
        Ok(element)
    }

    fn text(&mut self, text: &str) -> Result<(), StoreError> {
        let n_bits = self.db.n_bits;
        match self.stack.last().copied() {
            Some(Element::Sig) => {
                let chip = self.chip_mut()?;
                chip.signature = Some(parse_bits(text, n_bits, &chip.name)?);
            }
            Some(Element::UnstableBits) => {
                let chip = self.chip_mut()?;
                chip.unstable_bits = Some(parse_bits(text, n_bits, &chip.name)?);
            }
            Some(Element::NoiseDist) => {
                let dist = parse_dist(text)?;
                self.chip_mut()?.noise.push(dist);
            }
            Some(Element::OtherDist) => {
                let dist = parse_dist(text)?;
                let chip = self.chip_mut()?;
                let other = chip
                    .current_other
                    .clone()
                    .ok_or_else(|| format_error("<dist> outside of <other>"))?;
                chip.inter_chip.entry(other).or_default().push(dist);
            }
            _ => return Err(format_error(format!("unexpected text '{text}'"))),
        }
        Ok(())
    }

    fn close(&mut self, element: Element) -> Result<(), StoreError> {
        match element {
            Element::Chip => {
                let chip = self
                    .chip
                    .take()
                    .ok_or_else(|| format_error("closing </chip> without an open chip"))?;
                let signature = chip
                    .signature
                    .ok_or_else(|| format_error(format!("chip '{}' has no <sig>", chip.name)))?;
                let capacity = self.db.capacity;
                let record = ChipRecord {
                    signature,
                    meas_count: chip.meas_count,
                    noise: DistanceWindow::from_values(capacity, chip.noise),
                    inter_chip: chip
                        .inter_chip
                        .into_iter()
                        .filter(|(other, _)| *other != chip.name)
                        .map(|(other, dists)| (other, DistanceWindow::from_values(capacity, dists)))
                        .collect(),
                    unstable_bits: chip.unstable_bits,
                };
                self.db.records.insert(chip.name, record);
            }
            Element::Other => {
                self.chip_mut()?.current_other = None;
            }
            _ => {}
        }
        Ok(())
    }

    fn chip_mut(&mut self) -> Result<&mut PendingChip, StoreError> {
        self.chip
            .as_mut()
            .ok_or_else(|| format_error("element outside of <chip>"))
    }
}

fn optional_attr(e: &BytesStart<'_>, key: &str) -> Result<Option<String>, StoreError> {
    match e.try_get_attribute(key)? {
        Some(attr) => Ok(Some(attr.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

fn required_attr(e: &BytesStart<'_>, key: &str) -> Result<String, StoreError> {
    let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    optional_attr(e, key)?
        .ok_or_else(|| format_error(format!("<{tag}> is missing the '{key}' attribute")))
}

fn require_hex_encoding(e: &BytesStart<'_>) -> Result<(), StoreError> {
    match optional_attr(e, "encoding")?.as_deref() {
        Some("hex") => Ok(()),
        other => Err(format_error(format!(
            "only hex encoding is supported, found {:?}",
            other.unwrap_or("none")
        ))),
    }
}

fn parse_bits(text: &str, n_bits: usize, chip: &str) -> Result<Signature, StoreError> {
    let bits = Signature::from_hex(text)
        .map_err(|e| format_error(format!("chip '{chip}': {e}")))?;
    if bits.len() != n_bits {
        return Err(format_error(format!(
            "chip '{chip}': expected {n_bits} bits, found {}",
            bits.len()
        )));
    }
    Ok(bits)
}

fn parse_dist(text: &str) -> Result<usize, StoreError> {
    text.trim()
        .parse()
        .map_err(|_| format_error(format!("invalid distance '{text}'")))
}
