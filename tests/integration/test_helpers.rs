//! Shared plumbing for integration tests: a fake host orchestrator and
//! line-oriented client helpers speaking the plugin wire protocol.

use std::path::{Path, PathBuf};

use interprocess::local_socket::{tokio::prelude::*, GenericFilePath, ListenerOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use plugin_harness::protocol::{RegisterRequest, RegisterResponse};
use plugin_harness::PluginConfig;

/// A listener standing in for the host orchestrator's registration socket.
///
/// Every received [`RegisterRequest`] is forwarded on `registrations`;
/// the `accept` policy decides, by zero-based request index, whether the
/// handshake is acknowledged or refused.
pub struct FakeHost {
    pub registrations: mpsc::UnboundedReceiver<RegisterRequest>,
    task: JoinHandle<()>,
}

impl FakeHost {
    pub fn spawn(socket_path: &Path, accept: impl Fn(u64) -> bool + Send + 'static) -> Self {
        let name = socket_path
            .to_fs_name::<GenericFilePath>()
            .expect("host socket name");
        let listener = ListenerOptions::new()
            .name(name)
            .create_tokio()
            .expect("bind fake host socket");

        let (tx, registrations) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut count = 0u64;
            loop {
                let Ok(stream) = listener.accept().await else {
                    break;
                };
                let (reader, mut writer) = stream.split();
                let mut line = String::new();
                let mut buf_reader = BufReader::new(reader);
                if buf_reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                    continue;
                }
                let request: RegisterRequest =
                    serde_json::from_str(line.trim()).expect("register request parses");

                let ok = accept(count);
                count += 1;
                let response = RegisterResponse {
                    ok,
                    error: if ok { None } else { Some("refused".into()) },
                };
                let mut encoded = serde_json::to_string(&response).expect("response encodes");
                encoded.push('\n');
                let _ = writer.write_all(encoded.as_bytes()).await;
                let _ = tx.send(request);
            }
        });

        Self {
            registrations,
            task,
        }
    }

    /// Wait for the next registration with a generous bound.
    pub async fn next_registration(&mut self) -> RegisterRequest {
        tokio::time::timeout(std::time::Duration::from_secs(10), self.registrations.recv())
            .await
            .expect("registration within deadline")
            .expect("fake host alive")
    }

    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// Connect to a plugin socket and split into line reader + writer.
pub async fn connect_lines(
    socket_path: &Path,
) -> (
    BufReader<interprocess::local_socket::tokio::RecvHalf>,
    interprocess::local_socket::tokio::SendHalf,
) {
    let name = socket_path
        .to_fs_name::<GenericFilePath>()
        .expect("socket name");
    let stream = interprocess::local_socket::tokio::Stream::connect(name)
        .await
        .expect("connect to plugin socket");
    let (reader, writer) = stream.split();
    (BufReader::new(reader), writer)
}

/// Send one JSON value as a line.
pub async fn send_line<W, T>(writer: &mut W, message: &T)
where
    W: tokio::io::AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let mut line = serde_json::to_string(message).expect("message encodes");
    line.push('\n');
    writer.write_all(line.as_bytes()).await.expect("write line");
}

/// Read one JSON line with a deadline; panics on EOF.
pub async fn read_line_json<R, T>(reader: &mut R) -> T
where
    R: tokio::io::AsyncBufRead + Unpin,
    T: serde::de::DeserializeOwned,
{
    let mut line = String::new();
    let read = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        reader.read_line(&mut line),
    )
    .await
    .expect("line within deadline")
    .expect("read line");
    assert!(read > 0, "stream closed before a line arrived");
    serde_json::from_str(line.trim()).expect("line parses")
}

/// Read until EOF, asserting the stream ends within the deadline.
pub async fn expect_eof<R>(reader: &mut R)
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        reader.read_line(&mut line),
    )
    .await
    .expect("EOF within deadline")
    .expect("read line");
    assert_eq!(read, 0, "expected EOF, got: {line}");
}

/// Config pointing every path at `dir`.
pub fn config_in(dir: &Path) -> PluginConfig {
    PluginConfig {
        resource_name: "vendor/test".into(),
        plugin_dir: PathBuf::from(dir),
        socket_name: "plugin-test.sock".into(),
        host_socket_name: "host-test.sock".into(),
        protocol_version: "v1alpha".into(),
        register_timeout_seconds: 5,
        probe_interval_seconds: 60,
    }
}
