//! Metadata backend driving the `exiftool` executable.
//!
//! Reads use `exiftool -j -struct -n`, which reports MWG regions and
//! keyword hierarchies as nested JSON. Writes hand exiftool a JSON file
//! through `-json=` and rewrite the original in place.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

use super::{Area, Keyword, MetadataBackend, MetadataRecord, Region, RegionKind};

#[derive(Debug, Clone)]
pub struct ExifTool {
    program: PathBuf,
}

impl Default for ExifTool {
    fn default() -> Self {
        Self {
            program: PathBuf::from("exiftool"),
        }
    }
}

impl ExifTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Check if exiftool can be run.
    pub fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("-ver")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

impl MetadataBackend for ExifTool {
    fn read(&self, path: &Path) -> Result<MetadataRecord> {
        let output = Command::new(&self.program)
            .arg("-j")
            .arg("-struct")
            .arg("-n")
            .arg(path)
            .output()
            .with_context(|| format!("Failed to run {}", self.program.display()))?;

        // exiftool still prints JSON (with an Error field) for files it
        // cannot read, so the body is checked before the exit status.
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            bail!(
                "exiftool failed on {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        parse_output(&stdout)
    }

    fn write(&self, path: &Path, record: &MetadataRecord) -> Result<()> {
        let payload = write_payload(path, record);

        let mut file = tempfile::Builder::new()
            .prefix("shoebox-")
            .suffix(".json")
            .tempfile()?;
        serde_json::to_writer(&mut file, &payload)?;
        file.flush()?;

        debug!(path = %path.display(), "writing metadata with exiftool");
        let output = Command::new(&self.program)
            .arg("-overwrite_original")
            .arg("-n")
            .arg(format!("-json={}", file.path().display()))
            .arg(path)
            .output()
            .with_context(|| format!("Failed to run {}", self.program.display()))?;

        if !output.status.success() {
            bail!(
                "exiftool could not write {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// One entry of `exiftool -j -struct -n` output.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ExifJson {
    #[serde(deserialize_with = "text")]
    error: Option<String>,
    #[serde(deserialize_with = "text")]
    title: Option<String>,
    #[serde(deserialize_with = "text")]
    description: Option<String>,
    #[serde(deserialize_with = "text")]
    image_description: Option<String>,
    #[serde(deserialize_with = "number")]
    orientation: Option<f64>,
    #[serde(deserialize_with = "number")]
    image_width: Option<f64>,
    #[serde(deserialize_with = "number")]
    image_height: Option<f64>,
    region_info: Option<RegionInfo>,
    keyword_info: Option<KeywordInfo>,
    #[serde(deserialize_with = "text")]
    country: Option<String>,
    #[serde(deserialize_with = "text")]
    state: Option<String>,
    #[serde(deserialize_with = "text")]
    city: Option<String>,
    #[serde(deserialize_with = "text")]
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
struct RegionInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    applied_to_dimensions: Option<Dimensions>,
    region_list: Vec<MwgRegion>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
struct Dimensions {
    #[serde(deserialize_with = "number")]
    w: Option<f64>,
    #[serde(deserialize_with = "number")]
    h: Option<f64>,
    #[serde(deserialize_with = "text")]
    unit: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
struct MwgRegion {
    area: Option<MwgArea>,
    #[serde(deserialize_with = "text", skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "Type", deserialize_with = "text", skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(deserialize_with = "text", skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase", default)]
struct MwgArea {
    #[serde(deserialize_with = "number")]
    x: Option<f64>,
    #[serde(deserialize_with = "number")]
    y: Option<f64>,
    #[serde(deserialize_with = "number")]
    w: Option<f64>,
    #[serde(deserialize_with = "number")]
    h: Option<f64>,
    #[serde(deserialize_with = "text")]
    unit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct KeywordInfo {
    hierarchy: Vec<MwgKeyword>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct MwgKeyword {
    #[serde(deserialize_with = "text")]
    keyword: Option<String>,
    #[serde(deserialize_with = "flag")]
    applied: Option<bool>,
    children: Vec<MwgKeyword>,
}

/// exiftool prints numeric-looking strings as JSON numbers, so a year
/// keyword "2021" arrives as `2021`.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => items.first().and_then(value_text),
        _ => None,
    }
}

fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(d)?;
    Ok(value.as_ref().and_then(value_text))
}

fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let value = Option::<Value>::deserialize(d)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    let value = Option::<Value>::deserialize(d)?;
    Ok(match value {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::Number(n)) => n.as_i64().map(|n| n != 0),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Parse the JSON array exiftool prints for a single file.
pub fn parse_output(json: &str) -> Result<MetadataRecord> {
    let entries: Vec<ExifJson> =
        serde_json::from_str(json).context("Failed to parse exiftool output")?;
    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("exiftool returned no entries"))?;

    if let Some(error) = entry.error {
        bail!("exiftool: {}", error);
    }

    let regions = entry
        .region_info
        .map(|info| info.region_list.into_iter().filter_map(convert_region).collect())
        .unwrap_or_default();

    let keywords = entry
        .keyword_info
        .map(|info| info.hierarchy.into_iter().filter_map(convert_keyword).collect())
        .unwrap_or_default();

    Ok(MetadataRecord {
        title: non_empty(entry.title),
        description: non_empty(entry.description.or(entry.image_description)),
        orientation: entry.orientation.map(|o| o as i32),
        width: entry.image_width.map(|w| w as u32),
        height: entry.image_height.map(|h| h as u32),
        regions,
        keywords,
        country: non_empty(entry.country),
        state: non_empty(entry.state),
        city: non_empty(entry.city),
        location: non_empty(entry.location),
    })
}

/// Regions without an area are dropped here; naming and typing problems
/// are left for the region interpreter to report.
fn convert_region(region: MwgRegion) -> Option<Region> {
    let area = region.area?;
    Some(Region {
        kind: RegionKind::parse(region.kind.as_deref().unwrap_or("")),
        name: region.name.unwrap_or_default().trim().to_string(),
        area: Area {
            x: area.x?,
            y: area.y?,
            w: area.w?,
            h: area.h?,
        },
        description: non_empty(region.description),
    })
}

fn convert_keyword(keyword: MwgKeyword) -> Option<Keyword> {
    let name = non_empty(keyword.keyword)?;
    Some(Keyword {
        name,
        applied: keyword.applied,
        children: keyword
            .children
            .into_iter()
            .filter_map(convert_keyword)
            .collect(),
    })
}

fn keyword_json(keyword: &Keyword) -> Value {
    let mut node = Map::new();
    node.insert("Keyword".into(), json!(keyword.name));
    if let Some(applied) = keyword.applied {
        node.insert("Applied".into(), json!(applied));
    }
    if !keyword.children.is_empty() {
        node.insert(
            "Children".into(),
            Value::Array(keyword.children.iter().map(keyword_json).collect()),
        );
    }
    Value::Object(node)
}

/// The `-json=` document for writing the populated parts of `record`.
fn write_payload(path: &Path, record: &MetadataRecord) -> Value {
    let mut tags = Map::new();
    tags.insert("SourceFile".into(), json!(path.to_string_lossy()));

    if let Some(title) = &record.title {
        tags.insert("XMP-dc:Title".into(), json!(title));
    }
    if let Some(description) = &record.description {
        tags.insert("XMP-dc:Description".into(), json!(description));
        tags.insert("EXIF:ImageDescription".into(), json!(description));
    }
    if let Some(orientation) = record.orientation {
        tags.insert("EXIF:Orientation".into(), json!(orientation));
    }

    if !record.regions.is_empty() {
        let info = RegionInfo {
            applied_to_dimensions: match (record.width, record.height) {
                (Some(w), Some(h)) => Some(Dimensions {
                    w: Some(w as f64),
                    h: Some(h as f64),
                    unit: Some("pixel".into()),
                }),
                _ => None,
            },
            region_list: record
                .regions
                .iter()
                .map(|r| MwgRegion {
                    area: Some(MwgArea {
                        x: Some(r.area.x),
                        y: Some(r.area.y),
                        w: Some(r.area.w),
                        h: Some(r.area.h),
                        unit: Some("normalized".into()),
                    }),
                    name: Some(r.name.clone()),
                    kind: Some(r.kind.as_str().to_string()),
                    description: r.description.clone(),
                })
                .collect(),
        };
        tags.insert("XMP-mwg-rs:RegionInfo".into(), json!(info));
    }

    if !record.keywords.is_empty() {
        let hierarchy: Vec<Value> = record.keywords.iter().map(keyword_json).collect();
        tags.insert(
            "XMP-mwg-kw:KeywordInfo".into(),
            json!({ "Hierarchy": hierarchy }),
        );
    }

    for (tag, value) in [
        ("XMP-photoshop:Country", &record.country),
        ("XMP-photoshop:State", &record.state),
        ("XMP-photoshop:City", &record.city),
        ("XMP-iptcCore:Location", &record.location),
    ] {
        if let Some(value) = value {
            tags.insert(tag.into(), json!(value));
        }
    }

    Value::Array(vec![Value::Object(tags)])
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[{
        "SourceFile": "/photos/a.jpg",
        "Title": "Beach day",
        "ImageDescription": "Waves",
        "Orientation": 6,
        "ImageWidth": 4000,
        "ImageHeight": 3000,
        "RegionInfo": {
            "AppliedToDimensions": {"W": 4000, "H": 3000, "Unit": "pixel"},
            "RegionList": [
                {"Area": {"X": 0.5, "Y": 0.4, "W": 0.1, "H": 0.2, "Unit": "normalized"},
                 "Name": "Alice", "Type": "Face", "Description": "front"},
                {"Area": {"X": 0.2, "Y": 0.7, "W": 0.1, "H": 0.1, "Unit": "normalized"},
                 "Name": "Rex", "Type": "Pet"},
                {"Name": "No area", "Type": "Face"}
            ]
        },
        "KeywordInfo": {
            "Hierarchy": [
                {"Keyword": "Dates", "Children": [
                    {"Keyword": 2021, "Children": [{"Keyword": "07 - July"}]}
                ]},
                {"Keyword": "Travel", "Applied": "True", "Children": [{"Keyword": "Paris"}]}
            ]
        },
        "Country": "France",
        "City": "Paris",
        "State": ""
    }]"#;

    #[test]
    fn test_parse_regions_and_keywords() {
        let record = parse_output(SAMPLE).unwrap();

        assert_eq!(record.title.as_deref(), Some("Beach day"));
        assert_eq!(record.description.as_deref(), Some("Waves"));
        assert_eq!(record.orientation, Some(6));
        assert_eq!((record.width, record.height), (Some(4000), Some(3000)));

        assert_eq!(record.regions.len(), 2);
        assert_eq!(record.regions[0].kind, RegionKind::Face);
        assert_eq!(record.regions[0].area.y, 0.4);
        assert_eq!(record.regions[0].description.as_deref(), Some("front"));
        assert_eq!(record.regions[1].kind, RegionKind::Pet);

        assert_eq!(record.keywords[0].children[0].name, "2021");
        assert_eq!(record.keywords[1].applied, Some(true));
        assert_eq!(record.keywords[1].children[0].applied, None);

        assert_eq!(record.country.as_deref(), Some("France"));
        assert_eq!(record.state, None);
    }

    #[test]
    fn test_error_entry_is_hard_error() {
        let json = r#"[{"SourceFile": "/x.jpg", "Error": "File format error"}]"#;
        assert!(parse_output(json).is_err());
        assert!(parse_output("not json").is_err());
    }

    #[test]
    fn test_write_payload_only_carries_populated_fields() {
        let record = MetadataRecord {
            title: Some("T".into()),
            keywords: vec![Keyword::branch("Dates", vec![Keyword::leaf("2020")])],
            state: Some("US-WA".into()),
            ..MetadataRecord::default()
        };
        let payload = write_payload(Path::new("/p/a.jpg"), &record);
        let tags = payload[0].as_object().unwrap();

        assert_eq!(tags["XMP-dc:Title"], "T");
        assert_eq!(tags["XMP-photoshop:State"], "US-WA");
        assert_eq!(
            tags["XMP-mwg-kw:KeywordInfo"]["Hierarchy"][0]["Children"][0]["Keyword"],
            "2020"
        );
        assert!(!tags.contains_key("XMP-mwg-rs:RegionInfo"));
        assert!(!tags.contains_key("XMP-dc:Description"));
    }
}
