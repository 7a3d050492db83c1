//! Typed records for the configuration database
//!
//! The project tree keys each object by its element name and mixes many
//! object kinds. Only the kinds the accessory layer cares about are decoded,
//! each into an explicit record with optional fields; everything else is
//! skipped.

use crate::error::{VantageError, VantageResult};
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;

/// A dimmable or switched lighting load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadObject {
    pub vid: u32,
    pub name: String,
    pub dname: Option<String>,
    pub load_type: String,
    /// VID of the containing area, if any.
    pub area: Option<u32>,
    pub exclude_from_widgets: bool,
}

/// A climate-control object.
#[derive(Debug, Clone, PartialEq)]
pub struct HvacObject {
    pub vid: u32,
    pub name: String,
    pub dname: Option<String>,
    pub exclude_from_widgets: bool,
}

/// A room or zone grouping other objects.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaObject {
    pub vid: u32,
    pub name: String,
}

/// How a load behaves for dimming purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    Dimmer,
    Relay,
}

impl LoadObject {
    /// Relay and motor load types cannot be dimmed; everything else is
    /// treated as a dimmer.
    pub fn kind(&self) -> LoadKind {
        if self.load_type.contains("Relay") || self.load_type.contains("Motor") {
            LoadKind::Relay
        } else {
            LoadKind::Dimmer
        }
    }

    /// The display name overrides the internal name when set.
    pub fn display_name(&self) -> &str {
        match self.dname.as_deref() {
            Some(d) if !d.is_empty() => d,
            _ => &self.name,
        }
    }
}

impl HvacObject {
    pub fn display_name(&self) -> &str {
        match self.dname.as_deref() {
            Some(d) if !d.is_empty() => d,
            _ => &self.name,
        }
    }
}

/// The decoded project tree, reduced to the object kinds this crate exposes.
#[derive(Debug, Clone, Default)]
pub struct ProjectDatabase {
    pub loads: Vec<LoadObject>,
    pub hvacs: Vec<HvacObject>,
    pub areas: Vec<AreaObject>,
}

impl ProjectDatabase {
    /// Decode the project tree from the configuration database text.
    pub fn parse(document: &str) -> VantageResult<ProjectDatabase> {
        let mut reader = quick_xml::Reader::from_str(document);
        let mut database = ProjectDatabase::default();
        let mut stack: Vec<String> = Vec::new();
        let mut record: Option<RawRecord> = None;
        let mut field: Option<String> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let elem = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    if record.is_some() {
                        field = Some(elem.clone());
                    } else if stack.ends_with_path(&["Objects", "Object"]) {
                        record = Some(RawRecord::open(&elem, &e));
                    }
                    stack.push(elem);
                }
                Ok(Event::Empty(e)) => {
                    // A self-closing child like <DName/> records an empty field.
                    if let Some(r) = record.as_mut() {
                        let elem = String::from_utf8_lossy(e.name().as_ref()).to_string();
                        r.fields.entry(elem).or_default();
                    }
                }
                Ok(Event::Text(t)) => {
                    if let (Some(r), Some(f)) = (record.as_mut(), field.as_ref()) {
                        let text = t.unescape().unwrap_or_default();
                        r.fields
                            .entry(f.clone())
                            .or_default()
                            .push_str(text.trim());
                    }
                }
                Ok(Event::End(_)) => {
                    let closed = stack.pop().unwrap_or_default();
                    if field.as_deref() == Some(closed.as_str()) {
                        field = None;
                    } else if record.as_ref().map(|r| r.element.as_str()) == Some(closed.as_str())
                        && stack.ends_with_path(&["Objects", "Object"])
                    {
                        if let Some(r) = record.take() {
                            r.finish(&mut database);
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(VantageError::DatabaseParse(format!(
                        "project tree at byte {}: {}",
                        reader.buffer_position(),
                        e
                    )))
                }
                Ok(_) => {}
            }
        }
        Ok(database)
    }

    /// Resolve an area VID to its name.
    pub fn area_name(&self, vid: u32) -> Option<&str> {
        self.areas
            .iter()
            .find(|a| a.vid == vid)
            .map(|a| a.name.as_str())
    }
}

/// One object element while its children are being collected.
struct RawRecord {
    element: String,
    vid: Option<u32>,
    fields: HashMap<String, String>,
}

impl RawRecord {
    fn open(element: &str, start: &BytesStart) -> Self {
        Self {
            element: element.to_string(),
            vid: get_attribute(start, "VID").and_then(|v| v.trim().parse().ok()),
            fields: HashMap::new(),
        }
    }

    fn finish(mut self, database: &mut ProjectDatabase) {
        // Objects without a VID cannot be addressed on the wire.
        let Some(vid) = self.vid else { return };
        let object_type = self
            .fields
            .remove("ObjectType")
            .unwrap_or_else(|| self.element.clone());
        let name = self.fields.remove("Name").unwrap_or_default();
        let dname = self.fields.remove("DName").filter(|d| !d.is_empty());
        let exclude = self
            .fields
            .remove("ExcludeFromWidgets")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        match object_type.as_str() {
            "Load" => database.loads.push(LoadObject {
                vid,
                name,
                dname,
                load_type: self.fields.remove("LoadType").unwrap_or_default(),
                area: self.fields.remove("Area").and_then(|a| a.trim().parse().ok()),
                exclude_from_widgets: exclude,
            }),
            "HVAC" => database.hvacs.push(HvacObject {
                vid,
                name,
                dname,
                exclude_from_widgets: exclude,
            }),
            "Area" => database.areas.push(AreaObject { vid, name }),
            _ => {}
        }
    }
}

/// Helper to get an attribute from an XML start tag
fn get_attribute(e: &BytesStart, name: &str) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == name.as_bytes())
        .map(|a| String::from_utf8_lossy(&a.value).to_string())
}

trait PathStack {
    fn ends_with_path(&self, suffix: &[&str]) -> bool;
}

impl PathStack for Vec<String> {
    fn ends_with_path(&self, suffix: &[&str]) -> bool {
        self.len() >= suffix.len()
            && self[self.len() - suffix.len()..]
                .iter()
                .zip(suffix)
                .all(|(a, b)| a == b)
    }
}
