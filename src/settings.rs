//! Workspace settings: JSON sections in the `settings` table merged over
//! built-in defaults and validated field by field.

use crate::catalog::SchoolDefaults;
use crate::db;
use crate::reconcile::resolver::AutoCreate;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::time::Duration;

const MIN_UPLOAD_BYTES: i64 = 1024;
const MAX_UPLOAD_BYTES: i64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupSection {
    Upload,
    Results,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [SetupSection::Upload, SetupSection::Results];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upload" => Some(Self::Upload),
            "results" => Some(Self::Results),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Results => "results",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Upload => "setup.upload",
            Self::Results => "setup.results",
        }
    }
}

pub fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Upload => json!({
            "sessionTtlSeconds": 1800,
            "maxUploadBytes": 5 * 1024 * 1024,
            "autoCreateRegions": true,
            "autoCreateClusters": true,
            "autoCreateSchools": true,
            "provisionSchoolLogins": true,
            "defaultSchoolAddress": "",
            "defaultSchoolPhone": "",
            "defaultSchoolEmail": ""
        }),
        SetupSection::Results => json!({
            "defaultMaxScore": 100,
            "defaultPassScore": 50
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v
        .as_f64()
        .filter(|n| n.is_finite())
        .ok_or_else(|| format!("{} must be a number", key))?;
    if n < min || n > max {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.chars().count() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Upload => match k.as_str() {
                "sessionTtlSeconds" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 60, 86_400)?));
                }
                "maxUploadBytes" => {
                    obj.insert(
                        k.clone(),
                        Value::from(parse_i64_range(v, k, MIN_UPLOAD_BYTES, MAX_UPLOAD_BYTES)?),
                    );
                }
                "autoCreateRegions" | "autoCreateClusters" | "autoCreateSchools"
                | "provisionSchoolLogins" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "defaultSchoolAddress" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 200)?));
                }
                "defaultSchoolPhone" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 40)?));
                }
                "defaultSchoolEmail" => {
                    let s = parse_string_max(v, k, 200)?;
                    if !s.is_empty() && !s.contains('@') {
                        return Err(format!("{} must be an email address", k));
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown upload field: {}", k)),
            },
            SetupSection::Results => match k.as_str() {
                "defaultMaxScore" => {
                    obj.insert(k.clone(), json!(parse_f64_range(v, k, 1.0, 1000.0)?));
                }
                "defaultPassScore" => {
                    obj.insert(k.clone(), json!(parse_f64_range(v, k, 0.0, 1000.0)?));
                }
                _ => return Err(format!("unknown results field: {}", k)),
            },
        }
    }
    if section == SetupSection::Results {
        let max = obj.get("defaultMaxScore").and_then(|v| v.as_f64()).unwrap_or(100.0);
        let pass = obj.get("defaultPassScore").and_then(|v| v.as_f64()).unwrap_or(50.0);
        if pass > max {
            return Err("defaultPassScore must not exceed defaultMaxScore".into());
        }
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

fn field_bool(v: &Value, key: &str, default: bool) -> bool {
    v.get(key).and_then(|x| x.as_bool()).unwrap_or(default)
}

fn field_str(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Typed view of `setup.upload`.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSettings {
    pub session_ttl: Duration,
    pub max_upload_bytes: usize,
    pub auto_create: AutoCreate,
    pub provision_school_logins: bool,
    pub school_defaults: SchoolDefaults,
}

impl UploadSettings {
    pub fn from_value(v: &Value) -> Self {
        let ttl = v
            .get("sessionTtlSeconds")
            .and_then(|x| x.as_u64())
            .unwrap_or(1800);
        let max_bytes = v
            .get("maxUploadBytes")
            .and_then(|x| x.as_u64())
            .unwrap_or(5 * 1024 * 1024);
        Self {
            session_ttl: Duration::from_secs(ttl),
            max_upload_bytes: max_bytes as usize,
            auto_create: AutoCreate {
                regions: field_bool(v, "autoCreateRegions", true),
                clusters: field_bool(v, "autoCreateClusters", true),
                schools: field_bool(v, "autoCreateSchools", true),
            },
            provision_school_logins: field_bool(v, "provisionSchoolLogins", true),
            school_defaults: SchoolDefaults {
                address: field_str(v, "defaultSchoolAddress"),
                phone: field_str(v, "defaultSchoolPhone"),
                email: field_str(v, "defaultSchoolEmail"),
            },
        }
    }

    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        Ok(Self::from_value(&load_section(conn, SetupSection::Upload)?))
    }
}

/// Typed view of `setup.results`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultsSettings {
    pub default_max_score: f64,
    pub default_pass_score: f64,
}

impl ResultsSettings {
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let v = load_section(conn, SetupSection::Results)?;
        Ok(Self {
            default_max_score: v
                .get("defaultMaxScore")
                .and_then(|x| x.as_f64())
                .unwrap_or(crate::grading::DEFAULT_MAX_SCORE),
            default_pass_score: v
                .get("defaultPassScore")
                .and_then(|x| x.as_f64())
                .unwrap_or(crate::grading::DEFAULT_PASS_SCORE),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(v: Value) -> Map<String, Value> {
        v.as_object().cloned().expect("object")
    }

    #[test]
    fn defaults_map_to_typed_settings() {
        let s = UploadSettings::from_value(&default_section(SetupSection::Upload));
        assert_eq!(s.session_ttl, Duration::from_secs(1800));
        assert_eq!(s.max_upload_bytes, 5 * 1024 * 1024);
        assert_eq!(s.auto_create, AutoCreate::default());
        assert!(s.provision_school_logins);
        assert_eq!(s.school_defaults, SchoolDefaults::default());
    }

    #[test]
    fn upload_patch_is_validated() {
        let mut v = default_section(SetupSection::Upload);
        merge_section_patch(
            SetupSection::Upload,
            &mut v,
            &patch(json!({
                "sessionTtlSeconds": 120,
                "autoCreateSchools": false,
                "defaultSchoolEmail": " office@example.org "
            })),
        )
        .expect("valid patch");
        let s = UploadSettings::from_value(&v);
        assert_eq!(s.session_ttl, Duration::from_secs(120));
        assert!(!s.auto_create.schools);
        assert_eq!(s.school_defaults.email, "office@example.org");

        for bad in [
            json!({ "sessionTtlSeconds": 5 }),
            json!({ "maxUploadBytes": 10 }),
            json!({ "autoCreateRegions": "yes" }),
            json!({ "defaultSchoolEmail": "nobody" }),
            json!({ "colour": "red" }),
        ] {
            let mut v = default_section(SetupSection::Upload);
            assert!(merge_section_patch(SetupSection::Upload, &mut v, &patch(bad.clone())).is_err(), "{}", bad);
        }
    }

    #[test]
    fn pass_score_cannot_exceed_max() {
        let mut v = default_section(SetupSection::Results);
        let e = merge_section_patch(
            SetupSection::Results,
            &mut v,
            &patch(json!({ "defaultMaxScore": 40 })),
        )
        .unwrap_err();
        assert!(e.contains("defaultPassScore"));

        let mut v = default_section(SetupSection::Results);
        merge_section_patch(
            SetupSection::Results,
            &mut v,
            &patch(json!({ "defaultMaxScore": 40, "defaultPassScore": 20 })),
        )
        .expect("valid");
        assert_eq!(v["defaultMaxScore"], json!(40.0));
    }

    #[test]
    fn saved_sections_override_defaults() {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        db::settings_set_json(&conn, "setup.upload", &json!({ "maxUploadBytes": 10 }))
            .expect("save");
        let s = UploadSettings::load(&conn).expect("load");
        assert_eq!(s.max_upload_bytes, 5 * 1024 * 1024);

        db::settings_set_json(&conn, "setup.upload", &json!({ "maxUploadBytes": 2048 }))
            .expect("save");
        assert_eq!(UploadSettings::load(&conn).expect("load").max_upload_bytes, 2048);
        let r = ResultsSettings::load(&conn).expect("load");
        assert_eq!(r.default_max_score, 100.0);
    }
}
