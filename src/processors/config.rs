//! `@ConfigMap` and `@Secret`: named payloads mounted into the workload.

use std::{collections::BTreeMap, path::PathBuf};

use serde_json::Value;

use super::{resolve_name, scalar_string, AnnotationProcessor, Fields};
use crate::{
    error::{Error, Result},
    input::{AnnotationKind, AnnotationUse, Origin},
    model::{ConfigMapModel, ModuleContext, SecretModel},
    names::{CONFIG_MAP_POSTFIX, SECRET_POSTFIX},
};

const ENTRY_KEYS: &[&str] = &["name", "mountPath", "readOnly", "defaultMode", "data"];

/// Largest file mode kubernetes accepts for projected keys (0777).
const MAX_DEFAULT_MODE: i32 = 0o777;

pub struct ConfigMapProcessor;

impl AnnotationProcessor for ConfigMapProcessor {
    fn process(&self, ctx: &mut ModuleContext, annotation: &AnnotationUse) -> Result<()> {
        let fields = Fields::new(AnnotationKind::ConfigMap, &annotation.data, &["configMaps"]);
        for entry in entries(&fields, "configMaps", CONFIG_MAP_POSTFIX)? {
            if annotation.origin == Origin::Inferred
                && ctx.config_maps.iter().any(|c| c.name == entry.name)
            {
                continue;
            }
            let mut data = entry.inline;
            for path in &entry.files {
                let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
                data.insert(file_key(path)?, text);
            }
            ctx.config_maps.push(ConfigMapModel {
                name: entry.name,
                mount_path: entry.mount_path,
                read_only: entry.read_only,
                default_mode: entry.default_mode,
                data,
                sources: entry.files,
            });
        }
        Ok(())
    }
}

pub struct SecretProcessor;

impl AnnotationProcessor for SecretProcessor {
    fn process(&self, ctx: &mut ModuleContext, annotation: &AnnotationUse) -> Result<()> {
        let fields = Fields::new(AnnotationKind::Secret, &annotation.data, &["secrets"]);
        for entry in entries(&fields, "secrets", SECRET_POSTFIX)? {
            if annotation.origin == Origin::Inferred
                && ctx.secrets.iter().any(|s| s.name == entry.name)
            {
                continue;
            }
            let mut data: BTreeMap<String, Vec<u8>> = entry
                .inline
                .into_iter()
                .map(|(k, v)| (k, v.into_bytes()))
                .collect();
            for path in &entry.files {
                let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
                data.insert(file_key(path)?, bytes);
            }
            ctx.secrets.push(SecretModel {
                name: entry.name,
                mount_path: entry.mount_path,
                read_only: entry.read_only,
                default_mode: entry.default_mode,
                data,
                sources: entry.files,
            });
        }
        Ok(())
    }
}

struct Entry {
    name: String,
    mount_path: Option<String>,
    read_only: bool,
    default_mode: Option<i32>,
    inline: BTreeMap<String, String>,
    files: Vec<PathBuf>,
}

/// `data` is either an inline record or a list of files whose names become keys.
fn entries(fields: &Fields, key: &str, postfix: &str) -> Result<Vec<Entry>> {
    let mut out = Vec::new();
    for record in fields.records(key, ENTRY_KEYS)? {
        let mut inline = BTreeMap::new();
        let mut files = Vec::new();
        match record.value("data") {
            None => {}
            Some(Value::Array(items)) => {
                for item in items {
                    match item {
                        Value::String(path) => files.push(PathBuf::from(path)),
                        other => {
                            return Err(Error::schema(format!(
                                "{key} data files must be paths, found {other}"
                            )))
                        }
                    }
                }
            }
            Some(Value::Object(map)) => {
                for (k, v) in map {
                    let v = scalar_string(v).ok_or_else(|| {
                        Error::schema(format!("{key} data value for '{k}' must be a scalar, found {v}"))
                    })?;
                    inline.insert(k.clone(), v);
                }
            }
            Some(other) => {
                return Err(Error::schema(format!(
                    "{key} data must be a record or a list of files, found {other}"
                )))
            }
        }

        let fallback = match files.first() {
            Some(first) => first
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            None if record.string("name")?.is_none() => {
                return Err(Error::schema(format!(
                    "{key} entry needs a 'name' or at least one data file"
                )))
            }
            None => String::new(),
        };
        let (name, _) = resolve_name(&record, &fallback, postfix)?;

        let default_mode = match record.i32("defaultMode")? {
            Some(m) if !(0..=MAX_DEFAULT_MODE).contains(&m) => {
                return Err(Error::schema(format!(
                    "{key} defaultMode must be between 0 and 0777, found {m}"
                )))
            }
            other => other,
        };

        out.push(Entry {
            name,
            mount_path: record.string("mountPath")?,
            read_only: record.bool("readOnly")?.unwrap_or(true),
            default_mode,
            inline,
            files,
        });
    }
    Ok(out)
}

fn file_key(path: &std::path::Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::schema(format!("'{}' does not name a file", path.display())))
}
