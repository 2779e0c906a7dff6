//! In-memory guest used by the integration tests.
//!
//! [`FakeGuest`] implements every management-API seam plus the transfer
//! transport. Processes are scripted: each status poll appends the next
//! output step to the process's output file, and the process ends on the
//! poll that appends its last step.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use guestbox_api::{
    ApiError, AuthManager, Credentials, DownloadReader, FileAttributes, FileManager,
    FileTransferInformation, GuestOsFamily, ProcessInfo, ProcessManager, ProcessSpec, Transport,
    UploadReader,
};
use guestbox_core::{GuestContext, ToolboxConfig};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "hunter2";

/// Scripted behaviour of the next started program.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    /// Output appended on successive polls.
    pub steps: Vec<Vec<u8>>,
    /// Exit code reported once the steps are exhausted.
    pub exit_code: i32,
}

impl Behavior {
    pub fn output(steps: &[&str], exit_code: i32) -> Self {
        Self {
            steps: steps.iter().map(|s| s.as_bytes().to_vec()).collect(),
            exit_code,
        }
    }
}

#[derive(Debug)]
struct FakeProcess {
    output_path: Option<String>,
    steps: VecDeque<Vec<u8>>,
    exit_code: i32,
    ended: bool,
}

#[derive(Debug, Default)]
struct State {
    files: HashMap<String, Vec<u8>>,
    temp_counter: u64,
    temps: Vec<String>,
    behaviors: VecDeque<Behavior>,
    processes: HashMap<i64, FakeProcess>,
    next_pid: i64,
    started: Vec<ProcessSpec>,
    deleted: Vec<String>,
    moves: Vec<(String, String)>,
    uploads: Vec<(String, u64)>,
    pending_uploads: HashMap<String, (String, u64)>,
    pending_downloads: HashMap<String, String>,
    list_calls: u64,
    fail_start: bool,
    fail_list: bool,
    hide_processes: bool,
    downloads: u64,
    fail_downloads_after: Option<u64>,
    announced_size: Option<u64>,
}

/// In-memory guest.
#[derive(Debug)]
pub struct FakeGuest {
    family: GuestOsFamily,
    state: Mutex<State>,
}

impl FakeGuest {
    pub fn new(family: GuestOsFamily) -> Arc<Self> {
        Arc::new(Self {
            family,
            state: Mutex::new(State {
                next_pid: 4000,
                ..Default::default()
            }),
        })
    }

    /// Context for this guest with the default configuration.
    pub fn context(self: &Arc<Self>) -> GuestContext {
        GuestContext::new(
            self.clone(),
            self.clone(),
            self.clone(),
            Credentials::name_password(USERNAME, PASSWORD),
            self.family,
        )
        .with_config(ToolboxConfig::default())
    }

    /// Queue the behaviour of the next started program.
    pub fn expect_program(&self, behavior: Behavior) {
        self.lock().behaviors.push_back(behavior);
    }

    pub fn put_file(&self, path: &str, content: impl Into<Vec<u8>>) {
        self.lock().files.insert(path.to_string(), content.into());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    pub fn fail_start(&self) {
        self.lock().fail_start = true;
    }

    pub fn fail_list(&self) {
        self.lock().fail_list = true;
    }

    /// Make `list_processes` answer without any of the requested pids.
    pub fn hide_processes(&self) {
        self.lock().hide_processes = true;
    }

    /// Let `successful` downloads through, then fail every later one.
    pub fn fail_downloads_after(&self, successful: u64) {
        self.lock().fail_downloads_after = Some(successful);
    }

    /// Make the transport announce `size` for every download body.
    pub fn announce_download_size(&self, size: u64) {
        self.lock().announced_size = Some(size);
    }

    /// Every spec handed to `start_program`, in order.
    pub fn started(&self) -> Vec<ProcessSpec> {
        self.lock().started.clone()
    }

    /// Every temporary file ever created, in order.
    pub fn temps(&self) -> Vec<String> {
        self.lock().temps.clone()
    }

    /// Temporary files still present.
    pub fn live_temps(&self) -> Vec<String> {
        let state = self.lock();
        state
            .temps
            .iter()
            .filter(|p| state.files.contains_key(*p))
            .cloned()
            .collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    pub fn moves(&self) -> Vec<(String, String)> {
        self.lock().moves.clone()
    }

    /// Completed uploads as `(guest path, declared length)`.
    pub fn uploads(&self) -> Vec<(String, u64)> {
        self.lock().uploads.clone()
    }

    pub fn list_calls(&self) -> u64 {
        self.lock().list_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn temp_dir(&self) -> &'static str {
        if self.family.is_windows() {
            "C:\\Temp\\"
        } else {
            "/tmp/"
        }
    }

    fn check_auth(auth: &Credentials) -> guestbox_api::Result<()> {
        match auth {
            Credentials::NamePassword { username, password }
                if username == USERNAME && password == PASSWORD =>
            {
                Ok(())
            }
            _ => Err(ApiError::Authentication("invalid guest credentials".into())),
        }
    }
}

#[async_trait]
impl ProcessManager for FakeGuest {
    async fn start_program(&self, auth: &Credentials, spec: &ProcessSpec) -> guestbox_api::Result<i64> {
        Self::check_auth(auth)?;
        let mut state = self.lock();
        if state.fail_start {
            return Err(ApiError::Fault("program start refused".into()));
        }

        // Output goes to the newest scratch file named in the arguments.
        let output_path = state
            .temps
            .iter()
            .rev()
            .find(|p| spec.arguments.contains(p.as_str()))
            .cloned();

        let behavior = state.behaviors.pop_front().unwrap_or_default();
        let pid = state.next_pid;
        state.next_pid += 1;
        state.started.push(spec.clone());
        state.processes.insert(
            pid,
            FakeProcess {
                output_path,
                steps: behavior.steps.into(),
                exit_code: behavior.exit_code,
                ended: false,
            },
        );
        Ok(pid)
    }

    async fn list_processes(
        &self,
        auth: &Credentials,
        pids: &[i64],
    ) -> guestbox_api::Result<Vec<ProcessInfo>> {
        Self::check_auth(auth)?;
        let mut state = self.lock();
        state.list_calls += 1;
        if state.fail_list {
            return Err(ApiError::Timeout(std::time::Duration::from_secs(30)));
        }
        if state.hide_processes {
            return Ok(Vec::new());
        }

        let State {
            processes, files, ..
        } = &mut *state;
        let mut infos = Vec::new();
        for pid in pids {
            let Some(process) = processes.get_mut(pid) else {
                continue;
            };
            if !process.ended {
                if let Some(step) = process.steps.pop_front() {
                    if let Some(path) = &process.output_path {
                        files.entry(path.clone()).or_default().extend_from_slice(&step);
                    }
                }
                process.ended = process.steps.is_empty();
            }
            infos.push(ProcessInfo {
                pid: *pid,
                name: "fake".to_string(),
                start_time: Utc::now(),
                end_time: process.ended.then(Utc::now),
                exit_code: process.ended.then_some(process.exit_code),
            });
        }
        Ok(infos)
    }
}

#[async_trait]
impl FileManager for FakeGuest {
    async fn create_temporary_file(
        &self,
        auth: &Credentials,
        prefix: &str,
        suffix: &str,
        directory: Option<&str>,
    ) -> guestbox_api::Result<String> {
        Self::check_auth(auth)?;
        let dir = directory.unwrap_or(self.temp_dir()).to_string();
        let mut state = self.lock();
        state.temp_counter += 1;
        let path = format!("{dir}{prefix}{}{suffix}", state.temp_counter);
        state.files.insert(path.clone(), Vec::new());
        state.temps.push(path.clone());
        Ok(path)
    }

    async fn delete_file(&self, auth: &Credentials, path: &str) -> guestbox_api::Result<()> {
        Self::check_auth(auth)?;
        let mut state = self.lock();
        match state.files.remove(path) {
            Some(_) => {
                state.deleted.push(path.to_string());
                Ok(())
            }
            None => Err(ApiError::NotFound(path.to_string())),
        }
    }

    async fn move_file(
        &self,
        auth: &Credentials,
        src: &str,
        dst: &str,
        overwrite: bool,
    ) -> guestbox_api::Result<()> {
        Self::check_auth(auth)?;
        let mut state = self.lock();
        if !overwrite && state.files.contains_key(dst) {
            return Err(ApiError::Fault(format!("{dst} already exists")));
        }
        let content = state
            .files
            .remove(src)
            .ok_or_else(|| ApiError::NotFound(src.to_string()))?;
        state.files.insert(dst.to_string(), content);
        state.moves.push((src.to_string(), dst.to_string()));
        Ok(())
    }

    async fn initiate_file_transfer_from_guest(
        &self,
        auth: &Credentials,
        path: &str,
    ) -> guestbox_api::Result<FileTransferInformation> {
        Self::check_auth(auth)?;
        let mut state = self.lock();
        let size = state
            .files
            .get(path)
            .map(|c| c.len() as u64)
            .ok_or_else(|| ApiError::NotFound(path.to_string()))?;
        let token = format!("get-{}", state.pending_downloads.len());
        state.pending_downloads.insert(token.clone(), path.to_string());
        Ok(FileTransferInformation {
            url: format!("https://*/guestFile?id={token}"),
            size,
            attributes: FileAttributes::default(),
        })
    }

    async fn initiate_file_transfer_to_guest(
        &self,
        auth: &Credentials,
        path: &str,
        _attributes: &FileAttributes,
        size: u64,
        overwrite: bool,
    ) -> guestbox_api::Result<String> {
        Self::check_auth(auth)?;
        let mut state = self.lock();
        if !overwrite && state.files.contains_key(path) {
            return Err(ApiError::Fault(format!("{path} already exists")));
        }
        let token = format!("put-{}", state.pending_uploads.len());
        state
            .pending_uploads
            .insert(token.clone(), (path.to_string(), size));
        Ok(format!("https://*/guestFile?id={token}"))
    }

    async fn transfer_url(&self, raw: &str) -> guestbox_api::Result<String> {
        Ok(raw.replace("https://*/", "https://esx.local/"))
    }
}

#[async_trait]
impl AuthManager for FakeGuest {
    async fn validate_credentials(&self, auth: &Credentials) -> guestbox_api::Result<()> {
        Self::check_auth(auth)
    }
}

fn token_of(url: &str) -> guestbox_api::Result<String> {
    let Some(rest) = url.strip_prefix("https://esx.local/guestFile?id=") else {
        return Err(ApiError::Transfer {
            status: 404,
            message: format!("unresolved transfer url {url}"),
        });
    };
    Ok(rest.to_string())
}

#[async_trait]
impl Transport for FakeGuest {
    async fn download(&self, url: &str) -> guestbox_api::Result<(DownloadReader, u64)> {
        let token = token_of(url)?;
        let mut state = self.lock();
        state.downloads += 1;
        if state
            .fail_downloads_after
            .is_some_and(|successful| state.downloads > successful)
        {
            return Err(ApiError::Transfer {
                status: 503,
                message: "transfer service unavailable".into(),
            });
        }
        let content = state
            .pending_downloads
            .get(&token)
            .and_then(|path| state.files.get(path))
            .cloned()
            .ok_or_else(|| ApiError::Transfer {
                status: 404,
                message: token.clone(),
            })?;
        let len = state.announced_size.unwrap_or(content.len() as u64);
        Ok((Box::new(Cursor::new(content)), len))
    }

    async fn upload(
        &self,
        url: &str,
        mut body: UploadReader,
        content_length: u64,
    ) -> guestbox_api::Result<()> {
        let token = token_of(url)?;
        let (path, declared) = self
            .lock()
            .pending_uploads
            .get(&token)
            .cloned()
            .ok_or_else(|| ApiError::Transfer {
                status: 404,
                message: token.clone(),
            })?;

        let mut content = Vec::new();
        body.read_to_end(&mut content).await?;
        if content.len() as u64 != content_length || content_length != declared {
            return Err(ApiError::Transfer {
                status: 400,
                message: format!(
                    "length mismatch: declared {declared}, header {content_length}, body {}",
                    content.len()
                ),
            });
        }

        let mut state = self.lock();
        state.files.insert(path.clone(), content);
        state.uploads.push((path, content_length));
        Ok(())
    }
}

/// Drain a channel of chunks into one buffer, checking the chunks tile it.
pub async fn drain(mut rx: tokio::sync::mpsc::Receiver<guestbox_core::OutputChunk>) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = rx.recv().await {
        assert_eq!(chunk.offset, out.len() as u64, "chunk left a gap or overlapped");
        assert!(!chunk.is_empty(), "empty chunk emitted");
        out.extend_from_slice(&chunk.data);
    }
    out
}
