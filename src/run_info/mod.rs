//! Resolution of the hierarchical run information into per-sample run descriptors.
//!
//! A run consists of lanes.  Each lane carries its own fields (genome build,
//! analysis, algorithm settings, ...) and optionally a list of multiplexed samples,
//! each identified by its barcode name.  Barcoded samples inherit every lane field
//! unless they override it.

use std::path::Path;

use indexmap::IndexMap;
use serde_json::Value;

use crate::err::Error;

/// Keys that are computed during resolution and thus may not be overridden per barcode.
const RESERVED_KEYS: &[&str] = &["lane", "description", "barcode_id", "multiplex"];

/// Shape of a field value; an override must have the shape of the lane default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ValueKind {
    Scalar,
    List,
    Map,
}

impl ValueKind {
    /// Shape of `value`; `None` for `null`.
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Array(_) => Some(ValueKind::List),
            Value::Object(_) => Some(ValueKind::Map),
            Value::Bool(_) | Value::Number(_) | Value::String(_) => Some(ValueKind::Scalar),
        }
    }
}

/// Lane identifiers may be given as numbers or strings.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum RawId {
    Str(String),
    Int(i64),
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match <RawId as serde::Deserialize>::deserialize(deserializer)? {
        RawId::Str(s) => s,
        RawId::Int(i) => i.to_string(),
    })
}

/// One barcoded sample within a lane.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct MultiplexEntry {
    /// Name of the barcode, becomes the descriptor's `barcode_id`.
    #[serde(deserialize_with = "deserialize_id")]
    pub name: String,
    /// Fields overriding the lane defaults.
    #[serde(flatten)]
    pub overrides: IndexMap<String, Value>,
}

/// One sequencing lane.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Lane {
    /// Identifier of the lane.
    #[serde(deserialize_with = "deserialize_id")]
    pub lane: String,
    /// Barcoded samples, in declaration order.
    #[serde(default)]
    pub multiplex: Option<Vec<MultiplexEntry>>,
    /// All other lane fields, in declaration order.
    #[serde(flatten)]
    pub fields: IndexMap<String, Value>,
}

/// One analyzable unit.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RunDescriptor {
    /// Identifier of the originating lane.
    pub lane: String,
    /// Label, `"<lane>: <barcode>"` for barcoded samples.
    pub description: String,
    /// The genome build to analyze against.
    pub genome_build: String,
    /// Barcode name, `None` for lanes without multiplexing.
    pub barcode_id: Option<String>,
    /// Remaining fields after inheritance.
    #[serde(flatten)]
    pub fields: IndexMap<String, Value>,
}

/// Resolve a single field: the override wins if set, otherwise the lane default.
pub fn resolve_field(
    name: &str,
    default: Option<&Value>,
    over: Option<&Value>,
) -> Result<Option<Value>, String> {
    let default = default.filter(|v| !v.is_null());
    let over = over.filter(|v| !v.is_null());
    match (default, over) {
        (default, None) => Ok(default.cloned()),
        (None, Some(over)) => Ok(Some(over.clone())),
        (Some(default), Some(over)) => {
            let (kind_default, kind_over) = (ValueKind::of(default), ValueKind::of(over));
            if kind_default == kind_over {
                Ok(Some(over.clone()))
            } else {
                Err(format!(
                    "field {:?} is a {} on the lane but overridden with a {}",
                    name,
                    kind_default.map(|k| k.to_string()).unwrap_or_default(),
                    kind_over.map(|k| k.to_string()).unwrap_or_default(),
                ))
            }
        }
    }
}

/// Build a descriptor from resolved fields.
fn build_descriptor(
    lane: &Lane,
    description: String,
    barcode_id: Option<String>,
    mut fields: IndexMap<String, Value>,
) -> Result<RunDescriptor, Error> {
    let context = match &barcode_id {
        Some(barcode) => format!("lane {}, barcode {}", &lane.lane, barcode),
        None => format!("lane {}", &lane.lane),
    };
    let genome_build = match fields.shift_remove("genome_build") {
        Some(Value::String(build)) => build,
        Some(other) => {
            return Err(Error::Configuration(format!(
                "{}: genome_build must be a string, got {}",
                context, other
            )))
        }
        None => {
            return Err(Error::Configuration(format!(
                "{}: no genome_build given",
                context
            )))
        }
    };
    fields.shift_remove("description");

    Ok(RunDescriptor {
        lane: lane.lane.clone(),
        description,
        genome_build,
        barcode_id,
        fields,
    })
}

/// Resolve one lane into its descriptors, one per multiplex entry or one for the lane.
pub fn resolve_lane(lane: &Lane) -> Result<Vec<RunDescriptor>, Error> {
    if lane.lane.is_empty() {
        return Err(Error::Configuration("lane with empty identifier".into()));
    }

    let entries = match lane.multiplex.as_deref() {
        None | Some([]) => {
            let description = match lane.fields.get("description") {
                Some(Value::String(s)) if !s.is_empty() => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => lane.lane.clone(),
            };
            let fields = lane
                .fields
                .iter()
                .filter(|(key, value)| {
                    !value.is_null() && !RESERVED_KEYS.contains(&key.as_str())
                })
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            return Ok(vec![build_descriptor(lane, description, None, fields)?]);
        }
        Some(entries) => entries,
    };

    let mut seen = std::collections::HashSet::new();
    let mut result = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.name.is_empty() {
            return Err(Error::Configuration(format!(
                "lane {}: multiplex entry with empty name",
                &lane.lane
            )));
        }
        if !seen.insert(entry.name.as_str()) {
            return Err(Error::Configuration(format!(
                "lane {}: duplicate barcode name {}",
                &lane.lane, &entry.name
            )));
        }
        if let Some(key) = entry
            .overrides
            .keys()
            .find(|key| RESERVED_KEYS.contains(&key.as_str()))
        {
            return Err(Error::Configuration(format!(
                "lane {}, barcode {}: field {:?} cannot be overridden",
                &lane.lane, &entry.name, key
            )));
        }

        let mut fields = IndexMap::new();
        let keys = lane
            .fields
            .keys()
            .chain(entry.overrides.keys())
            .filter(|key| !RESERVED_KEYS.contains(&key.as_str()));
        for key in keys {
            if fields.contains_key(key) {
                continue;
            }
            let value = resolve_field(key, lane.fields.get(key), entry.overrides.get(key))
                .map_err(|msg| {
                    Error::Configuration(format!(
                        "lane {}, barcode {}: {}",
                        &lane.lane, &entry.name, msg
                    ))
                })?;
            if let Some(value) = value {
                fields.insert(key.clone(), value);
            }
        }

        let description = format!("{}: {}", &lane.lane, &entry.name);
        result.push(build_descriptor(
            lane,
            description,
            Some(entry.name.clone()),
            fields,
        )?);
    }

    Ok(result)
}

/// Resolve all lanes; the result is indexed by lane, then by multiplex entry.
pub fn resolve(lanes: &[Lane]) -> Result<Vec<Vec<RunDescriptor>>, Error> {
    lanes.iter().map(resolve_lane).collect()
}

/// Resolved run information.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RunInfo {
    /// Name of the flowcell.
    pub fc_name: String,
    /// Date of the flowcell run, `YYMMDD`.
    pub fc_date: String,
    /// Descriptors by lane, then by barcode.
    pub details: Vec<Vec<RunDescriptor>>,
}

impl RunInfo {
    /// Iterate over all descriptors, lane by lane.
    pub fn flatten(&self) -> impl Iterator<Item = &RunDescriptor> {
        self.details.iter().flatten()
    }
}

/// Top-level layout of a run information file with flowcell metadata.
#[derive(Debug, serde::Deserialize)]
struct RunInfoFile {
    #[serde(default)]
    fc_name: Option<String>,
    #[serde(default)]
    fc_date: Option<String>,
    details: Vec<Lane>,
}

/// Parse the flowcell name and date from a directory like `110106_XYZ_0001_FC70BUKAAXX`.
pub fn flowcell_info<P: AsRef<Path>>(fc_dir: P) -> Option<(String, String)> {
    let base = fc_dir.as_ref().file_name()?.to_str()?;
    let parts = base.split('_').collect::<Vec<_>>();
    match (parts.first(), parts.last()) {
        (Some(date), Some(name))
            if parts.len() >= 2
                && (date.len() == 6 || date.len() == 8)
                && date.chars().all(|c| c.is_ascii_digit())
                && !name.is_empty() =>
        {
            Some((name.to_string(), date.to_string()))
        }
        _ => None,
    }
}

/// Parse run information from JSON, either an object with `details` or a bare lane list.
pub fn parse_run_info(json: &str, fc_dir: Option<&Path>) -> Result<RunInfo, Error> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| Error::Configuration(format!("invalid run information JSON: {}", e)))?;
    let file = if value.is_array() {
        RunInfoFile {
            fc_name: None,
            fc_date: None,
            details: serde_json::from_value(value)
                .map_err(|e| Error::Configuration(format!("invalid lane list: {}", e)))?,
        }
    } else {
        serde_json::from_value(value)
            .map_err(|e| Error::Configuration(format!("invalid run information: {}", e)))?
    };

    let from_dir = fc_dir.and_then(flowcell_info);
    let fc_name = file
        .fc_name
        .or_else(|| from_dir.as_ref().map(|(name, _)| name.clone()))
        .unwrap_or_else(|| "bcbio".to_string());
    let fc_date = file
        .fc_date
        .or_else(|| from_dir.as_ref().map(|(_, date)| date.clone()))
        .unwrap_or_else(|| chrono::Local::now().format("%y%m%d").to_string());

    Ok(RunInfo {
        fc_name,
        fc_date,
        details: resolve(&file.details)?,
    })
}

/// Load run information from the JSON file at `path`.
pub fn load_run_info<P: AsRef<Path>>(path: P, fc_dir: Option<&Path>) -> Result<RunInfo, Error> {
    let json = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        Error::Configuration(format!(
            "could not read run information {:?}: {}",
            path.as_ref(),
            e
        ))
    })?;
    let run_info = parse_run_info(&json, fc_dir)?;
    tracing::info!(
        "resolved {} lane(s) into {} run unit(s) for flowcell {} ({})",
        run_info.details.len(),
        run_info.flatten().count(),
        &run_info.fc_name,
        &run_info.fc_date
    );
    Ok(run_info)
}

/// Command line arguments for `run-info resolve` sub command.
#[derive(Debug, clap::Parser)]
#[command(author, version, about = "resolve run information", long_about = None)]
pub struct Args {
    /// Path to the run information JSON file.
    #[clap(long)]
    pub path_run_info: String,
    /// Optional flowcell directory to take name and date from.
    #[clap(long)]
    pub fc_dir: Option<String>,
}

/// Main entry point for `run-info resolve` sub command.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    let run_info = load_run_info(&args.path_run_info, args.fc_dir.as_deref().map(Path::new))?;
    println!("{}", serde_json::to_string_pretty(&run_info)?);
    Ok(())
}
