//! Connection to a TrustSync server.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::Path;
use trustsync_protocol::{
    chunk_count, decode, seal_chunk, Channel, FramedChannel, FsListing, ProtocolError, Request,
    RespCode, Response, TransferDigest,
};
use trustsync_security::{seal_public_key, LocalIdentity};

/// Progress of a chunked transfer, reported after each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Chunks completed so far.
    pub chunks_done: u64,
    /// Total chunks in the transfer.
    pub total_chunks: u64,
    /// Bytes completed so far.
    pub bytes_done: u64,
}

/// Summary of a committed upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    /// Chunks sent.
    pub chunks: u64,
    /// Bytes sent.
    pub bytes: u64,
    /// Chunks the server asked to resend.
    pub resent: u64,
}

/// A session with one server.
///
/// Requests are strictly sequential; every method blocks until the
/// exchange it starts has finished. After a transport error the client
/// should be dropped.
///
/// An upload abandoned halfway by a local read error leaves the server
/// waiting for chunks. The client then refuses further requests, and the
/// server releases its transfer slot once the client is dropped.
pub struct Client<C: Channel = FramedChannel<TcpStream>> {
    channel: C,
    config: ClientConfig,
    identity: LocalIdentity,
    authorized: bool,
    pending_salt: Option<Vec<u8>>,
    abandoned: bool,
}

impl Client {
    /// Connects over TCP and identifies as `config.host_id`.
    pub fn connect(config: ClientConfig, identity: LocalIdentity) -> ClientResult<Self> {
        config.validate()?;
        let stream = TcpStream::connect(config.server_addr.as_str())?;
        stream.set_nodelay(true)?;
        let channel = FramedChannel::new(stream).with_max_frame_len(config.max_frame_len);
        Self::handshake(channel, config, identity)
    }
}

impl<C: Channel> Client<C> {
    /// Identifies over an established channel.
    pub fn handshake(
        mut channel: C,
        config: ClientConfig,
        identity: LocalIdentity,
    ) -> ClientResult<Self> {
        channel.send(config.host_id.as_bytes())?;
        let response = channel.recv_response()?;
        let authorized = match response.code {
            RespCode::Ok => true,
            RespCode::OkButUnauthorized => false,
            _ => return Err(ClientError::rejected(&response)),
        };
        tracing::debug!(host = %config.host_id, authorized, "identified to server");

        Ok(Self {
            channel,
            config,
            identity,
            authorized,
            pending_salt: None,
            abandoned: false,
        })
    }

    /// Whether the server trusts this host.
    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    /// Whether an upload was abandoned mid-stream, leaving the connection
    /// out of step with the server.
    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    /// The host id presented to the server.
    pub fn host_id(&self) -> &str {
        &self.config.host_id
    }

    /// This client's signing identity.
    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    /// Starts registration and returns the server's salt.
    ///
    /// The server shows a one-time password to its operator. Pass it to
    /// [`finish_register`](Self::finish_register) next; no other request
    /// may be sent in between.
    pub fn start_register(&mut self) -> ClientResult<Vec<u8>> {
        self.ensure_open()?;
        if self.pending_salt.is_some() {
            return Err(ClientError::InvalidState("registration already started"));
        }
        let response = self.request(&Request::Register)?;
        let salt = response
            .desc_bytes()
            .ok_or_else(|| ProtocolError::unexpected("registration reply without salt"))?
            .to_vec();
        self.pending_salt = Some(salt.clone());
        Ok(salt)
    }

    /// Completes registration with the password read by the operator.
    ///
    /// A wrong password yields a `WrongPassword` rejection; registration
    /// can then be started again.
    pub fn finish_register(&mut self, password: &str) -> ClientResult<()> {
        let salt = self
            .pending_salt
            .take()
            .ok_or(ClientError::InvalidState("no registration in progress"))?;
        let sealed = seal_public_key(
            password.trim(),
            &salt,
            self.config.kdf_rounds,
            &self.identity.public_key_bytes(),
        )?;
        self.channel.send(&sealed)?;
        self.expect_ok()?;
        self.authorized = true;
        tracing::info!(host = %self.config.host_id, "registered with server");
        Ok(())
    }

    /// Lists a directory; `None` lists the served directory itself.
    pub fn list(&mut self, path: Option<&[String]>) -> ClientResult<FsListing> {
        self.ensure_idle()?;
        let response = self.request(&Request::Fstree {
            path: path.map(<[String]>::to_vec),
        })?;
        let bytes = response
            .desc_bytes()
            .ok_or_else(|| ProtocolError::unexpected("listing reply without payload"))?;
        Ok(decode(bytes)?)
    }

    /// Uploads `local` to the server path built from `dest`.
    ///
    /// Chunks that arrive corrupted are resent until the server accepts
    /// them. The whole stream is signed at the end; the server commits the
    /// file only if the signature verifies.
    pub fn upload(
        &mut self,
        local: &Path,
        dest: &[String],
        mut progress: impl FnMut(&TransferProgress),
    ) -> ClientResult<UploadReport> {
        self.ensure_idle()?;
        let file = File::open(local).map_err(|e| ClientError::storage(local, e))?;
        let metadata = file.metadata().map_err(|e| ClientError::storage(local, e))?;
        if !metadata.is_file() {
            return Err(ClientError::storage(
                local,
                io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }
        self.upload_from(file, metadata.len(), local, dest, &mut progress)
    }

    fn upload_from<R: Read>(
        &mut self,
        mut source: R,
        size: u64,
        local: &Path,
        dest: &[String],
        progress: &mut impl FnMut(&TransferProgress),
    ) -> ClientResult<UploadReport> {
        let chunk_size = self.config.chunk_size;
        let total = chunk_count(size, chunk_size);

        self.request(&Request::Upload {
            dest: dest.to_vec(),
            total,
        })?;
        tracing::info!(local = %local.display(), size, total, "upload started");

        self.identity.reset();
        let mut buffer = vec![0u8; chunk_size];
        let mut remaining = size;
        let mut report = UploadReport {
            chunks: 0,
            bytes: 0,
            resent: 0,
        };
        for chunk in 0..total {
            let want = remaining.min(chunk_size as u64) as usize;
            let read = match read_up_to(&mut source, &mut buffer[..want]) {
                Ok(read) => read,
                Err(err) => {
                    self.abandoned = true;
                    tracing::warn!(local = %local.display(), chunk, error = %err, "upload abandoned");
                    return Err(ClientError::storage(local, err));
                }
            };
            let payload = &buffer[..read];
            let frame = seal_chunk(payload);

            loop {
                self.channel.send(&frame)?;
                let response = self.channel.recv_response()?;
                match response.code {
                    RespCode::Ok => break,
                    RespCode::IntegrityFail => {
                        report.resent += 1;
                        tracing::debug!(chunk, "server asked to resend chunk");
                    }
                    _ => return Err(ClientError::rejected(&response)),
                }
            }

            self.identity.update(payload);
            remaining -= want as u64;
            report.chunks += 1;
            report.bytes += read as u64;
            progress(&TransferProgress {
                chunks_done: chunk + 1,
                total_chunks: total,
                bytes_done: report.bytes,
            });
        }

        let signature = self.identity.finish();
        self.channel.send(&signature)?;
        self.expect_ok()?;
        tracing::info!(bytes = report.bytes, resent = report.resent, "upload committed");
        Ok(report)
    }

    /// Downloads `remote` into `local`.
    ///
    /// The data is written to a temporary file beside `local` and moved
    /// into place only if it matches the server's digest. Returns the
    /// number of bytes written.
    pub fn fetch(
        &mut self,
        remote: &str,
        local: &Path,
        mut progress: impl FnMut(&TransferProgress),
    ) -> ClientResult<u64> {
        self.ensure_idle()?;
        let response = self.request(&Request::Fetch {
            path: remote.to_string(),
        })?;
        let total: u64 = response
            .desc_text()
            .and_then(|text| text.trim().parse().ok())
            .ok_or_else(|| ProtocolError::unexpected("fetch reply without chunk count"))?;

        // The server streams regardless of local failures, so the remaining
        // frames are drained before reporting one.
        let mut sink = match create_sink(local) {
            Ok(sink) => Some(sink),
            Err(err) => {
                self.drain(total)?;
                return Err(err);
            }
        };
        let mut local_error = None;
        let mut digest = TransferDigest::new();
        let mut bytes = 0u64;

        for chunk in 0..total {
            let data = self.channel.recv()?;
            digest.update(&data);
            bytes += data.len() as u64;
            if let Some(file) = sink.as_mut() {
                if let Err(err) = file.as_file_mut().write_all(&data) {
                    local_error = Some(ClientError::storage(file.path(), err));
                    sink = None;
                }
            }
            progress(&TransferProgress {
                chunks_done: chunk + 1,
                total_chunks: total,
                bytes_done: bytes,
            });
        }

        let expected = self.channel.recv()?;
        if let Some(err) = local_error {
            return Err(err);
        }
        if expected.as_slice() != digest.finalize().as_slice() {
            tracing::warn!(remote, "fetched data does not match digest");
            return Err(ClientError::DigestMismatch {
                remote: remote.to_string(),
            });
        }

        if let Some(sink) = sink {
            sink.persist(local)
                .map_err(|e| ClientError::storage(local, e.error))?;
        }
        tracing::info!(remote, local = %local.display(), bytes, "fetch complete");
        Ok(bytes)
    }

    /// Ends the session.
    pub fn close(self) {
        tracing::debug!(host = %self.config.host_id, "closing connection");
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.abandoned {
            return Err(ClientError::InvalidState(
                "connection abandoned mid-upload; reconnect",
            ));
        }
        Ok(())
    }

    fn ensure_idle(&self) -> ClientResult<()> {
        self.ensure_open()?;
        if self.pending_salt.is_some() {
            return Err(ClientError::InvalidState(
                "registration in progress; call finish_register first",
            ));
        }
        Ok(())
    }

    fn request(&mut self, request: &Request) -> ClientResult<Response> {
        self.channel.send(&request.encode()?)?;
        let response = self.channel.recv_response()?;
        if response.code != RespCode::Ok {
            return Err(ClientError::rejected(&response));
        }
        Ok(response)
    }

    fn expect_ok(&mut self) -> ClientResult<Response> {
        let response = self.channel.recv_response()?;
        if response.code != RespCode::Ok {
            return Err(ClientError::rejected(&response));
        }
        Ok(response)
    }

    fn drain(&mut self, chunks: u64) -> ClientResult<()> {
        for _ in 0..=chunks {
            self.channel.recv()?;
        }
        Ok(())
    }
}

impl<C: Channel> std::fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("host_id", &self.config.host_id)
            .field("server_addr", &self.config.server_addr)
            .field("authorized", &self.authorized)
            .finish_non_exhaustive()
    }
}

fn create_sink(local: &Path) -> ClientResult<tempfile::NamedTempFile> {
    let parent = match local.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| ClientError::storage(parent, e))?;
    tempfile::Builder::new()
        .prefix(".trustsync-")
        .suffix(".part")
        .tempfile_in(parent)
        .map_err(|e| ClientError::storage(parent, e))
}

fn read_up_to<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::{self, JoinHandle};
    use tempfile::tempdir;
    use trustsync_protocol::{split_chunk_frame, MemoryChannel};
    use trustsync_security::{digest_of, TrustStore};

    fn config() -> ClientConfig {
        ClientConfig::default()
            .with_host_id("alice")
            .with_chunk_size(4)
            .with_kdf_rounds(1_000)
    }

    /// Runs `script` as the server end of an in-memory connection.
    fn scripted<F>(greeting: RespCode, script: F) -> (MemoryChannel, JoinHandle<()>)
    where
        F: FnOnce(&mut MemoryChannel) + Send + 'static,
    {
        let (client, mut server) = MemoryChannel::pair();
        let handle = thread::spawn(move || {
            assert_eq!(server.recv().unwrap(), b"alice");
            server.send_response(&Response::new(greeting)).unwrap();
            script(&mut server);
        });
        (client, handle)
    }

    fn expect_request(server: &mut MemoryChannel) -> Request {
        Request::decode(&server.recv().unwrap()).unwrap()
    }

    #[test]
    fn handshake_reports_authorization() {
        let (channel, handle) = scripted(RespCode::Ok, |_| {});
        let client = Client::handshake(channel, config(), LocalIdentity::generate()).unwrap();
        assert!(client.is_authorized());
        handle.join().unwrap();

        let (channel, handle) = scripted(RespCode::OkButUnauthorized, |_| {});
        let client = Client::handshake(channel, config(), LocalIdentity::generate()).unwrap();
        assert!(!client.is_authorized());
        handle.join().unwrap();

        let (channel, handle) = scripted(RespCode::Failed, |_| {});
        let err = Client::handshake(channel, config(), LocalIdentity::generate()).unwrap_err();
        assert_eq!(err.code(), Some(RespCode::Failed));
        handle.join().unwrap();
    }

    #[test]
    fn registration_order_is_enforced() {
        let (channel, handle) = scripted(RespCode::OkButUnauthorized, |server| {
            assert_eq!(expect_request(server), Request::Register);
            server
                .send_response(&Response::with_bytes(RespCode::Ok, vec![1u8; 16]))
                .unwrap();
            // Sealed key arrives next.
            server.recv().unwrap();
            server
                .send_response(&Response::new(RespCode::WrongPassword))
                .unwrap();
        });
        let mut client = Client::handshake(channel, config(), LocalIdentity::generate()).unwrap();

        assert!(matches!(
            client.finish_register("pw"),
            Err(ClientError::InvalidState(_))
        ));
        assert_eq!(client.start_register().unwrap(), vec![1u8; 16]);
        assert!(matches!(client.list(None), Err(ClientError::InvalidState(_))));
        assert!(matches!(
            client.start_register(),
            Err(ClientError::InvalidState(_))
        ));

        let err = client.finish_register("pw").unwrap_err();
        assert_eq!(err.code(), Some(RespCode::WrongPassword));
        assert!(!client.is_authorized());
        handle.join().unwrap();
    }

    #[test]
    fn upload_resends_rejected_chunks() {
        let identity = LocalIdentity::from_secret_bytes(&[2u8; 32]);
        let mut store = TrustStore::new();
        store.trust("alice", &identity.public_key_bytes()).unwrap();

        let (channel, handle) = scripted(RespCode::Ok, move |server| {
            let total = match expect_request(server) {
                Request::Upload { dest, total } => {
                    assert_eq!(dest, vec!["out.txt".to_string()]);
                    total
                }
                other => panic!("unexpected {other:?}"),
            };
            assert_eq!(total, 3);
            server.send_response(&Response::ok()).unwrap();

            let mut received = Vec::new();
            let mut first = true;
            while received.len() < 3 {
                let frame = server.recv().unwrap();
                if first {
                    first = false;
                    server
                        .send_response(&Response::new(RespCode::IntegrityFail))
                        .unwrap();
                    continue;
                }
                let (payload, _) = split_chunk_frame(&frame).unwrap();
                received.push(payload.to_vec());
                server.send_response(&Response::ok()).unwrap();
            }

            let signature = server.recv().unwrap();
            let data = received.concat();
            assert_eq!(data, b"0123456789");
            assert!(store
                .verify_signature("alice", &digest_of(&data), &signature)
                .unwrap());
            server.send_response(&Response::ok()).unwrap();
        });

        let dir = tempdir().unwrap();
        let local = dir.path().join("out.txt");
        fs::write(&local, b"0123456789").unwrap();

        let mut client = Client::handshake(channel, config(), identity).unwrap();
        let mut seen = Vec::new();
        let report = client
            .upload(&local, &["out.txt".to_string()], |p| seen.push(p.chunks_done))
            .unwrap();
        assert_eq!(
            report,
            UploadReport {
                chunks: 3,
                bytes: 10,
                resent: 1
            }
        );
        assert_eq!(seen, vec![1, 2, 3]);
        handle.join().unwrap();
    }

    /// Yields `good` and then fails every read.
    struct FailingReader {
        good: &'static [u8],
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.good.is_empty() {
                return Err(io::Error::other("device went away"));
            }
            let n = self.good.len().min(buf.len());
            buf[..n].copy_from_slice(&self.good[..n]);
            self.good = &self.good[n..];
            Ok(n)
        }
    }

    fn send_listing(server: &mut MemoryChannel, listing: &FsListing) {
        server
            .send_response(&Response::with_bytes(
                RespCode::Ok,
                trustsync_protocol::encode(listing).unwrap(),
            ))
            .unwrap();
    }

    #[test]
    fn upload_refuses_non_regular_file_before_requesting() {
        let (channel, handle) = scripted(RespCode::Ok, |server| {
            // The first request after the failed upload is the listing.
            assert_eq!(expect_request(server), Request::Fstree { path: None });
            send_listing(server, &FsListing::default());
        });

        let dir = tempdir().unwrap();
        let mut client = Client::handshake(channel, config(), LocalIdentity::generate()).unwrap();
        let err = client
            .upload(dir.path(), &["x.bin".to_string()], |_| {})
            .unwrap_err();
        assert!(matches!(err, ClientError::Storage { .. }));
        assert!(!client.is_abandoned());
        assert_eq!(client.list(None).unwrap(), FsListing::default());
        handle.join().unwrap();
    }

    #[test]
    fn read_failure_mid_upload_abandons_connection() {
        let (channel, handle) = scripted(RespCode::Ok, |server| {
            match expect_request(server) {
                Request::Upload { total, .. } => assert_eq!(total, 2),
                other => panic!("unexpected {other:?}"),
            }
            server.send_response(&Response::ok()).unwrap();
            let frame = server.recv().unwrap();
            assert_eq!(split_chunk_frame(&frame).unwrap().0, b"abcd");
            server.send_response(&Response::ok()).unwrap();
            // Nothing else arrives; the client hangs up instead.
            assert!(server.recv().unwrap_err().is_disconnect());
        });

        let dir = tempdir().unwrap();
        let local = dir.path().join("other.txt");
        fs::write(&local, b"data").unwrap();

        let mut client = Client::handshake(channel, config(), LocalIdentity::generate()).unwrap();
        let mut progress = |_: &TransferProgress| {};
        let err = client
            .upload_from(
                FailingReader { good: b"abcd" },
                8,
                Path::new("flaky.bin"),
                &["flaky.bin".to_string()],
                &mut progress,
            )
            .unwrap_err();
        assert!(matches!(err, ClientError::Storage { .. }));
        assert!(client.is_abandoned());

        assert!(matches!(client.list(None), Err(ClientError::InvalidState(_))));
        assert!(matches!(
            client.upload(&local, &["other.txt".to_string()], |_| {}),
            Err(ClientError::InvalidState(_))
        ));
        assert!(matches!(
            client.start_register(),
            Err(ClientError::InvalidState(_))
        ));

        drop(client);
        handle.join().unwrap();
    }

    #[test]
    fn fetch_local_failure_keeps_connection_usable() {
        let listing = FsListing {
            files: vec!["data.bin".into()],
            dirs: Vec::new(),
            base: true,
        };
        let expected = listing.clone();
        let (channel, handle) = scripted(RespCode::OkButUnauthorized, move |server| {
            expect_request(server);
            server
                .send_response(&Response::with_text(RespCode::Ok, "2"))
                .unwrap();
            server.send(b"abcd").unwrap();
            server.send(b"ef").unwrap();
            server.send(&TransferDigest::of(b"abcdef")).unwrap();

            assert_eq!(expect_request(server), Request::Fstree { path: None });
            send_listing(server, &listing);
        });

        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();
        let local = blocker.join("copy.bin");

        let mut client = Client::handshake(channel, config(), LocalIdentity::generate()).unwrap();
        let err = client.fetch("data.bin", &local, |_| {}).unwrap_err();
        assert!(matches!(err, ClientError::Storage { .. }));
        assert!(!client.is_abandoned());

        assert_eq!(client.list(None).unwrap(), expected);
        handle.join().unwrap();
    }

    #[test]
    fn fetch_rejects_digest_mismatch() {
        let (channel, handle) = scripted(RespCode::OkButUnauthorized, |server| {
            expect_request(server);
            server
                .send_response(&Response::with_text(RespCode::Ok, "2"))
                .unwrap();
            server.send(b"abcd").unwrap();
            server.send(b"ef").unwrap();
            server.send(&TransferDigest::of(b"something else")).unwrap();
        });

        let dir = tempdir().unwrap();
        let local = dir.path().join("copy.bin");
        let mut client = Client::handshake(channel, config(), LocalIdentity::generate()).unwrap();
        let err = client.fetch("data.bin", &local, |_| {}).unwrap_err();
        assert_eq!(err.code(), Some(RespCode::IntegrityFail));
        assert!(!local.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        handle.join().unwrap();
    }

    #[test]
    fn fetch_writes_verified_file() {
        let (channel, handle) = scripted(RespCode::OkButUnauthorized, |server| {
            assert_eq!(
                expect_request(server),
                Request::Fetch {
                    path: "data.bin".into()
                }
            );
            server
                .send_response(&Response::with_text(RespCode::Ok, "2"))
                .unwrap();
            server.send(b"abcd").unwrap();
            server.send(b"ef").unwrap();
            server.send(&TransferDigest::of(b"abcdef")).unwrap();
        });

        let dir = tempdir().unwrap();
        let local = dir.path().join("nested").join("copy.bin");
        let mut client = Client::handshake(channel, config(), LocalIdentity::generate()).unwrap();
        assert_eq!(client.fetch("data.bin", &local, |_| {}).unwrap(), 6);
        assert_eq!(fs::read(&local).unwrap(), b"abcdef");
        handle.join().unwrap();
    }
}
