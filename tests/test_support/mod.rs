#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub struct Sidecar {
    pub child: Child,
    pub stdin: ChildStdin,
    pub reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn spawn_sidecar() -> Sidecar {
    let exe = env!("CARGO_BIN_EXE_exambookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn exambookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    Sidecar {
        child,
        stdin,
        reader: BufReader::new(stdout),
        next_id: 0,
    }
}

impl Sidecar {
    pub fn request(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn request_ok(&mut self, method: &str, params: Value) -> Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or(Value::Null)
    }

    pub fn request_err(&mut self, method: &str, params: Value) -> String {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value["error"]["code"].as_str().unwrap_or("").to_string()
    }
}

/// Fixture ids for a workspace seeded with one region/cluster/school/student
/// and two grade-6 subjects.
pub struct Seeded {
    pub exam_year_id: String,
    pub region_id: String,
    pub cluster_id: String,
    pub school_id: String,
    pub student_id: String,
}

pub fn open_workspace(sc: &mut Sidecar, prefix: &str) -> PathBuf {
    let workspace = temp_dir(prefix);
    sc.request_ok(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    workspace
}

pub fn seed(sc: &mut Sidecar) -> Seeded {
    let year = sc.request_ok("examYears.create", json!({ "label": "2024", "isActive": true }));
    sc.request_ok(
        "subjects.create",
        json!({ "name": "Quran", "arabicName": "القرآن", "grade": 6 }),
    );
    sc.request_ok(
        "subjects.create",
        json!({ "name": "Hadith", "arabicName": "الحديث", "grade": 6 }),
    );
    let region = sc.request_ok("regions.create", json!({ "name": "Region A" }));
    let region_id = region["regionId"].as_str().expect("region id").to_string();
    let cluster = sc.request_ok(
        "clusters.create",
        json!({ "regionId": region_id, "name": "Central" }),
    );
    let cluster_id = cluster["clusterId"].as_str().expect("cluster id").to_string();
    let school = sc.request_ok(
        "schools.create",
        json!({ "clusterId": cluster_id, "name": "Al Noor", "code": "S1" }),
    );
    let school_id = school["schoolId"].as_str().expect("school id").to_string();
    let student = sc.request_ok(
        "students.create",
        json!({ "schoolId": school_id, "firstName": "Amina", "lastName": "Yusuf", "grade": 6 }),
    );
    Seeded {
        exam_year_id: year["examYearId"].as_str().expect("year id").to_string(),
        region_id,
        cluster_id,
        school_id,
        student_id: student["studentId"].as_str().expect("student id").to_string(),
    }
}

pub const HEADER: &str =
    "School Code,School Name,Location,Region,Student Number,Student Name,Quran,Hadith\n";
