//! Per-connection protocol state machine.

use crate::config::ServerConfig;
use crate::console::OperatorConsole;
use crate::error::{ServerError, ServerResult, TransferError};
use crate::sandbox::Sandbox;
use crate::transfer::TransferCoordinator;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use trustsync_protocol::{
    chunk_count, split_chunk_frame, Channel, FsListing, Request, RespCode, Response,
    TransferDigest,
};
use trustsync_security::{
    validate_host_id, RegistrationChallenge, RemoteVerifier, SecurityError, SharedTrustStore,
    TrustStore,
};

/// State shared by every session of one server.
pub struct SessionContext {
    /// Server configuration.
    pub config: ServerConfig,
    sandbox: Sandbox,
    trust_store: SharedTrustStore,
    coordinator: TransferCoordinator,
    console: Arc<dyn OperatorConsole>,
}

impl SessionContext {
    /// Validates `config`, opens the served directory and loads the trust store.
    pub fn new(config: ServerConfig, console: Arc<dyn OperatorConsole>) -> ServerResult<Self> {
        config.validate()?;
        let sandbox = Sandbox::new(&config.base_dir)?;
        let trust_store = TrustStore::scan(&config.trust_dir)?.into_shared();
        let coordinator = TransferCoordinator::new(RemoteVerifier::new(trust_store.clone()));

        tracing::info!(
            base = %sandbox.base().display(),
            trust_dir = %config.trust_dir.display(),
            hosts = trust_store.read().len(),
            "session context ready"
        );

        Ok(Self {
            config,
            sandbox,
            trust_store,
            coordinator,
            console,
        })
    }

    /// Path sandbox over the served directory.
    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Shared trust store.
    pub fn trust_store(&self) -> &SharedTrustStore {
        &self.trust_store
    }

    /// The upload slot.
    pub fn coordinator(&self) -> &TransferCoordinator {
        &self.coordinator
    }

    /// Writes pending trust records to the trust directory.
    pub fn flush_trust_store(&self) -> ServerResult<usize> {
        let saved = self.trust_store.write().save(&self.config.trust_dir)?;
        if saved > 0 {
            tracing::info!(saved, "persisted trusted hosts");
        }
        Ok(saved)
    }
}

/// One client connection.
///
/// The first message is the client's host id. After that the session
/// answers requests until the peer disconnects. Every rejection is a
/// response code; only transport failures end the session.
pub struct Session<C: Channel> {
    channel: C,
    context: Arc<SessionContext>,
    peer: String,
    host: String,
    authorized: bool,
}

impl<C: Channel> Session<C> {
    /// Creates a session over `channel`.
    pub fn new(channel: C, context: Arc<SessionContext>, peer: impl Into<String>) -> Self {
        Self {
            channel,
            context,
            peer: peer.into(),
            host: String::new(),
            authorized: false,
        }
    }

    /// Runs the session to completion.
    ///
    /// A peer disconnect is a normal end and returns `Ok`. The trust store
    /// is flushed on every exit path.
    pub fn run(mut self) -> ServerResult<()> {
        let span = tracing::info_span!(
            "session",
            peer = %self.peer,
            host = tracing::field::Empty
        );
        let _enter = span.enter();

        let result = match self.identify() {
            Ok(()) => {
                span.record("host", self.host.as_str());
                self.command_loop()
            }
            Err(err) => Err(err),
        };

        if let Err(err) = self.context.flush_trust_store() {
            tracing::error!(error = %err, "failed to persist trusted hosts");
        }

        match result {
            Err(err) if err.is_disconnect() => {
                tracing::info!("client disconnected");
                Ok(())
            }
            other => other,
        }
    }

    fn identify(&mut self) -> ServerResult<()> {
        let frame = self.channel.recv()?;
        let claimed = String::from_utf8(frame)
            .map_err(|_| SecurityError::InvalidHostId("host id is not UTF-8".into()))
            .and_then(|host| validate_host_id(&host).map(|()| host));
        let host = match claimed {
            Ok(host) => host,
            Err(err) => {
                tracing::warn!(error = %err, "rejected host identification");
                self.channel.send_response(&Response::failed(err.to_string()))?;
                return Err(err.into());
            }
        };

        let fingerprint = self.context.trust_store.read().fingerprint(&host).ok();
        self.authorized = fingerprint.is_some();
        self.context
            .console
            .host_connected(&host, fingerprint.as_deref());
        self.host = host;

        let response = if self.authorized {
            Response::ok()
        } else {
            Response::ok_but_unauthorized()
        };
        self.channel.send_response(&response)?;
        Ok(())
    }

    fn command_loop(&mut self) -> ServerResult<()> {
        loop {
            let frame = self.channel.recv()?;
            let request = match Request::decode(&frame) {
                Ok(request) => request,
                Err(err) => {
                    tracing::debug!(error = %err, "undecodable request");
                    self.reply(Response::failed(format!("malformed request: {err}")))?;
                    continue;
                }
            };

            tracing::debug!(command = request.kind(), "request");
            match request {
                Request::Register => self.register()?,
                Request::Upload { dest, total } => self.upload(&dest, total)?,
                Request::Fstree { path } => self.fstree(path.as_deref())?,
                Request::Fetch { path } => self.fetch(&path)?,
                Request::Unknown => self.reply(Response::new(RespCode::NoSuchCommand))?,
            }
        }
    }

    fn reply(&mut self, response: Response) -> ServerResult<()> {
        Ok(self.channel.send_response(&response)?)
    }

    fn register(&mut self) -> ServerResult<()> {
        if self.authorized {
            return self.reply(Response::new(RespCode::RegisterTwice));
        }

        let config = &self.context.config;
        let challenge =
            match RegistrationChallenge::generate(config.password_length, config.kdf_rounds) {
                Ok(challenge) => challenge,
                Err(err) => return self.reply(Response::failed(err.to_string())),
            };
        self.context
            .console
            .registration_password(&self.host, challenge.password());
        self.reply(Response::with_bytes(RespCode::Ok, challenge.salt().to_vec()))?;

        let sealed = self.channel.recv()?;
        let key = match challenge.open_public_key(&sealed) {
            Ok(key) => key,
            Err(_) => {
                tracing::warn!("registration failed: wrong password");
                return self.reply(Response::new(RespCode::WrongPassword));
            }
        };

        let fingerprint = {
            let mut store = self.context.trust_store.write();
            match store.trust_key(&self.host, key) {
                Ok(()) => store.fingerprint(&self.host).ok(),
                Err(err) => {
                    drop(store);
                    return self.reply(Response::failed(err.to_string()));
                }
            }
        };
        self.authorized = true;
        if let Some(fingerprint) = fingerprint.as_deref() {
            self.context
                .console
                .host_registered(&self.host, fingerprint);
        }
        self.reply(Response::ok())
    }

    fn upload(&mut self, dest: &[String], total: u64) -> ServerResult<()> {
        if !self.authorized {
            return self.reply(Response::new(RespCode::Unauthorized));
        }
        let path = match self.context.sandbox.resolve(dest) {
            Ok(path) if !self.context.sandbox.is_base(&path) => path,
            Ok(_) | Err(_) => {
                return self.reply(Response::new(RespCode::InvalidPath));
            }
        };

        let mut transfer = match self.context.coordinator.begin(&self.host, path, total) {
            Ok(transfer) => transfer,
            Err(err) => {
                tracing::info!(error = %err, "upload refused");
                return self.reply(Response::with_text(err.response_code(), err.to_string()));
            }
        };
        tracing::info!(dest = %transfer.dest().display(), total, "upload started");
        self.reply(Response::ok())?;

        let retry_cap = self.context.config.max_chunk_retries;
        for chunk in 0..total {
            let mut failures = 0u32;
            loop {
                let frame = self.channel.recv()?;
                let submitted = match split_chunk_frame(&frame) {
                    Ok((payload, checksum)) => transfer.submit_chunk(payload, checksum),
                    Err(_) => Err(TransferError::Integrity { chunk }),
                };
                match submitted {
                    Ok(()) => {
                        self.reply(Response::ok())?;
                        break;
                    }
                    Err(TransferError::Integrity { .. }) => {
                        failures += 1;
                        tracing::debug!(chunk, failures, "chunk failed checksum");
                        if retry_cap.is_some_and(|cap| failures > cap) {
                            tracing::warn!(chunk, failures, "chunk retry limit exceeded");
                            return self.reply(Response::failed(format!(
                                "chunk {chunk} failed its checksum {failures} times"
                            )));
                        }
                        self.reply(Response::new(RespCode::IntegrityFail))?;
                    }
                    Err(err) => {
                        tracing::error!(chunk, error = %err, "upload aborted");
                        return self
                            .reply(Response::with_text(err.response_code(), err.to_string()));
                    }
                }
            }
        }

        let signature = self.channel.recv()?;
        match transfer.finish(&signature) {
            Ok(true) => self.reply(Response::ok()),
            Ok(false) => self.reply(Response::new(RespCode::SignatureMismatch)),
            Err(err) => {
                tracing::error!(error = %err, "upload commit failed");
                self.reply(Response::with_text(err.response_code(), err.to_string()))
            }
        }
    }

    fn fstree(&mut self, path: Option<&[String]>) -> ServerResult<()> {
        let dir = match path {
            None => self.context.sandbox.base().to_path_buf(),
            Some(segments) => match self.context.sandbox.resolve(segments) {
                Ok(dir) => dir,
                Err(_) => return self.reply(Response::new(RespCode::InvalidPath)),
            },
        };
        if !dir.is_dir() {
            return self.reply(Response::new(RespCode::InvalidPath));
        }

        let listing = match list_dir(&dir) {
            Ok((files, dirs)) => FsListing {
                files,
                dirs,
                base: self.context.sandbox.is_base(&dir),
            },
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                return self.reply(Response::with_text(RespCode::AccessDenied, err.to_string()));
            }
            Err(err) => return self.reply(Response::failed(err.to_string())),
        };

        let bytes = trustsync_protocol::encode(&listing)?;
        self.reply(Response::with_bytes(RespCode::Ok, bytes))
    }

    fn fetch(&mut self, path: &str) -> ServerResult<()> {
        let path = match self.context.sandbox.resolve(&[path]) {
            Ok(path) => path,
            Err(_) => return self.reply(Response::new(RespCode::InvalidPath)),
        };
        let (mut file, size) = match open_regular(&path) {
            Ok(opened) => opened,
            Err(err) => {
                return self.reply(Response::with_text(RespCode::AccessDenied, err.to_string()));
            }
        };

        let chunk_size = self.context.config.chunk_size;
        let total = chunk_count(size, chunk_size);
        tracing::info!(path = %path.display(), size, total, "fetch started");
        self.reply(Response::with_text(RespCode::Ok, total.to_string()))?;

        let mut digest = TransferDigest::new();
        let mut buffer = vec![0u8; chunk_size];
        let mut remaining = size;
        for _ in 0..total {
            let want = remaining.min(chunk_size as u64) as usize;
            let read = read_up_to(&mut file, &mut buffer[..want]).map_err(|e| {
                tracing::error!(path = %path.display(), error = %e, "read failed mid-fetch");
                ServerError::Io(e)
            })?;
            let chunk = &buffer[..read];
            digest.update(chunk);
            self.channel.send(chunk)?;
            remaining -= want as u64;
        }

        self.channel.send(&digest.finalize())?;
        Ok(())
    }
}

fn list_dir(dir: &Path) -> io::Result<(Vec<String>, Vec<String>)> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        match fs::metadata(entry.path()) {
            Ok(meta) if meta.is_file() => files.push(name),
            Ok(meta) if meta.is_dir() => dirs.push(name),
            // Dangling links, sockets and the like.
            _ => {}
        }
    }
    files.sort();
    dirs.sort();
    Ok((files, dirs))
}

fn open_regular(path: &Path) -> io::Result<(File, u64)> {
    let file = File::open(path)?;
    let meta = file.metadata()?;
    if !meta.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", path.display()),
        ));
    }
    Ok((file, meta.len()))
}

/// Fills `buf` unless the file ends first; returns the bytes read.
fn read_up_to(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
