#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use serde_json::{json, Value};
use tempfile::TempDir;

/// Temporary data directory laid out the way `JsonDirStore` expects.
pub struct DataDir {
    dir: TempDir,
}

impl DataDir {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a whole collection file. Each document must carry an `id`.
    pub fn write_collection(
        &self,
        collection: &str,
        revision: u64,
        documents: Vec<Value>,
    ) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(format!("{collection}.json"));
        let body = json!({ "revision": revision, "documents": documents });
        fs::write(&path, serde_json::to_string_pretty(&body)?)?;
        Ok(path)
    }

    pub fn read_collection(&self, collection: &str) -> Result<Value, Box<dyn std::error::Error>> {
        let path = self.dir.path().join(format!("{collection}.json"));
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Stored document by id.
    pub fn document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Value>, Box<dyn std::error::Error>> {
        let body = self.read_collection(collection)?;
        Ok(body["documents"]
            .as_array()
            .and_then(|docs| docs.iter().find(|doc| doc["id"] == id).cloned()))
    }

    pub fn write_config(&self, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(".crmboard.toml");
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// A small board: two tasks for u1, one for u2, a customer, a project
    /// and the user directory.
    pub fn seed(&self) -> std::io::Result<()> {
        self.write_collection(
            "tasks",
            1,
            vec![
                json!({
                    "id": "t1",
                    "title": "Call back Dana",
                    "status": "לביצוע",
                    "urgency": "דחוף",
                    "assignedTo": "u1",
                    "customers": ["c1"],
                    "project": "p1",
                    "dueDate": "2024-05-02"
                }),
                json!({
                    "id": "t2",
                    "title": "Send invoice",
                    "status": "in_progress",
                    "assignedTo": ["u1", "u2"],
                    "customers": ["c404"]
                }),
                json!({
                    "id": "t3",
                    "title": "Someone else's",
                    "status": "todo",
                    "assignedTo": ["u2"]
                }),
            ],
        )?;
        self.write_collection(
            "customers",
            1,
            vec![json!({ "id": "c1", "name": "Dana", "lastName": "Levi" })],
        )?;
        self.write_collection(
            "projects",
            1,
            vec![json!({ "id": "p1", "name": "Website" })],
        )?;
        self.write_collection(
            "users",
            1,
            vec![
                json!({ "id": "u1", "displayName": "Noa" }),
                json!({ "id": "u2", "displayName": "Avi" }),
            ],
        )?;
        Ok(())
    }
}

pub fn crmboard_cmd(data: &DataDir) -> Command {
    let mut cmd = Command::cargo_bin("crmboard").expect("binary");
    cmd.env_remove("CRMBOARD_ACTOR")
        .env_remove("CRMBOARD_DATA_DIR")
        .env_remove("RUST_LOG")
        .arg("--data-dir")
        .arg(data.path());
    cmd
}

/// Parse the JSON envelope printed by `--json`.
pub fn envelope(stdout: &[u8]) -> Result<Value, Box<dyn std::error::Error>> {
    Ok(serde_json::from_slice(stdout)?)
}
