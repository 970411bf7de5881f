#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.temp_dir.path().join(name)).expect("read workspace file")
    }

    pub fn arg(&self, name: &str) -> String {
        self.temp_dir.path().join(name).to_string_lossy().into_owned()
    }
}

pub fn bin() -> Command {
    Command::cargo_bin("csv-reconcile").expect("binary exists")
}

pub const MAIN_CSV: &str = "id,name\n1,Alice\n2,Bob\n3,Carol\n";

pub const LOOKUP_CSV: &str = "id,val,tag\n1,10,x\n1,20,y\n2,5,x\n";
