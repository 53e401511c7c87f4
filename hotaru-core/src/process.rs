//! ターゲットプロセス管理

use crate::errors::LaunchError;
use crate::runtime::DebugRuntime;
use crate::types::TargetSpec;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// 出力を一度に読み取る最大バイト数
pub const DRAIN_CHUNK: usize = 1024;

/// 出力ストリーム
pub type OutputStream = Box<dyn Read + Send>;

/// 出力ストリームを読み続けて溜めておくキャプチャ
///
/// ストリームごとに読み取りスレッドを一つだけ持ちます。パイプを読み続けるので、
/// ターゲットが大量に出力してもパイプが詰まって停止することはありません。
struct OutputCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl OutputCapture {
    fn start(name: &'static str, mut stream: OutputStream) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);

        let reader = thread::Builder::new()
            .name(format!("hotaru-{}", name))
            .spawn(move || {
                let mut chunk = [0u8; DRAIN_CHUNK];
                loop {
                    match stream.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => sink
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .extend_from_slice(&chunk[..n]),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            tracing::warn!(stream = name, "failed to read target output: {}", e);
                            break;
                        }
                    }
                }
                tracing::trace!(stream = name, "output reader reached end of stream");
            });

        let reader = match reader {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(stream = name, "failed to start output reader: {}", e);
                None
            }
        };

        Self { buffer, reader }
    }

    /// 溜まった出力を取り出す
    ///
    /// `wait_for_eof` が真なら読み取りスレッドがストリームの終端に達するまで待ちます。
    fn finish(mut self, wait_for_eof: bool) -> Vec<u8> {
        if let Some(reader) = self.reader.take() {
            if (wait_for_eof || reader.is_finished()) && reader.join().is_err() {
                tracing::warn!("output reader panicked");
            }
        }
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// 起動したターゲットのハンドル
///
/// 標準出力・標準エラーはハンドルの作成時から読み取りスレッドが回収し続け、
/// 回収した内容は一度だけ取り出せます。
pub struct ProcessHandle {
    pid: u32,
    stdout: Option<OutputCapture>,
    stderr: Option<OutputCapture>,
    exit_code: Option<i32>,
    stopped: bool,
}

impl ProcessHandle {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            stdout: None,
            stderr: None,
            exit_code: None,
            stopped: false,
        }
    }

    pub fn with_stdout(mut self, stream: OutputStream) -> Self {
        self.stdout = Some(OutputCapture::start("stdout", stream));
        self
    }

    pub fn with_stderr(mut self, stream: OutputStream) -> Self {
        self.stderr = Some(OutputCapture::start("stderr", stream));
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// 回収した標準出力を取り出す（一度だけ取得できる）
    pub fn take_stdout(&mut self) -> Option<Vec<u8>> {
        let stopped = self.stopped;
        self.stdout.take().map(|capture| capture.finish(stopped))
    }

    /// 回収した標準エラーを取り出す（一度だけ取得できる）
    pub fn take_stderr(&mut self) -> Option<Vec<u8>> {
        let stopped = self.stopped;
        self.stderr.take().map(|capture| capture.finish(stopped))
    }

    /// 終了コードを記録する
    pub fn record_exit(&mut self, code: i32) {
        self.exit_code = Some(code);
        self.stopped = true;
    }

    /// ターゲットが終了または破棄されたことを記録する
    ///
    /// 以降の取り出しはストリームの終端まで待ってから行います。
    pub fn mark_stopped(&mut self) {
        self.stopped = true;
    }

    /// 終了コード（終了前は None）
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("exit_code", &self.exit_code)
            .field("stopped", &self.stopped)
            .finish()
    }
}

/// ターゲットプロセスマネージャ
///
/// プロセスハンドルを排他的に所有します。
#[derive(Debug, Default)]
pub struct TargetProcessManager {
    handle: Option<ProcessHandle>,
}

impl TargetProcessManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// ランタイム経由でターゲットを起動する
    pub fn launch<R: DebugRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        spec: &TargetSpec,
    ) -> Result<&ProcessHandle, LaunchError> {
        let handle = runtime.spawn(spec)?;
        tracing::info!(pid = handle.pid(), entry = ?spec.entry, "launched target");
        Ok(self.handle.insert(handle))
    }

    pub fn handle(&self) -> Option<&ProcessHandle> {
        self.handle.as_ref()
    }

    pub fn is_launched(&self) -> bool {
        self.handle.is_some()
    }

    /// 終了コードを記録する
    pub fn record_exit(&mut self, code: i32) {
        if let Some(handle) = self.handle.as_mut() {
            handle.record_exit(code);
        }
    }

    /// ターゲットが破棄されたことを記録する
    pub fn mark_stopped(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            handle.mark_stopped();
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.handle.as_ref().and_then(ProcessHandle::exit_code)
    }

    /// 回収した出力を一度だけ書き出す
    ///
    /// ターゲットの終了後（または破棄後）はストリームの終端まで待つので、出力を取りこぼしません。
    /// 実行中に呼んだ場合はその時点までの出力だけを書き出します。
    /// 一度取り出したストリームは手放すため、二回目以降は何もしません。
    pub fn drain_output(&mut self, out: &mut dyn Write, err: &mut dyn Write) -> io::Result<usize> {
        let handle = match self.handle.as_mut() {
            Some(handle) => handle,
            None => return Ok(0),
        };

        let mut total = 0;
        if let Some(captured) = handle.take_stdout() {
            total += write_captured(&captured, out)?;
        }
        if let Some(captured) = handle.take_stderr() {
            total += write_captured(&captured, err)?;
        }
        Ok(total)
    }
}

fn write_captured(captured: &[u8], sink: &mut dyn Write) -> io::Result<usize> {
    sink.write_all(captured)?;
    sink.flush()?;
    Ok(captured.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// 書き込み側が読まれるのを待つストリーム
    struct Blocking(std::sync::mpsc::Receiver<Vec<u8>>);

    impl Read for Blocking {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.recv() {
                Ok(data) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Err(_) => Ok(0),
            }
        }
    }

    #[test]
    fn test_output_larger_than_pipe_buffer_is_captured() {
        let data = vec![b'x'; 256 * 1024];
        let mut handle = ProcessHandle::new(7).with_stdout(Box::new(Cursor::new(data.clone())));
        handle.record_exit(0);

        assert_eq!(handle.take_stdout(), Some(data));
        assert_eq!(handle.take_stdout(), None);
    }

    #[test]
    fn test_reader_consumes_while_target_is_running() {
        let (tx, rx) = std::sync::mpsc::sync_channel(0);
        let mut handle = ProcessHandle::new(7).with_stdout(Box::new(Blocking(rx)));

        // 容量 0 のチャネルなので、読み手がいなければ send は戻らない
        for _ in 0..64 {
            tx.send(vec![b'y'; DRAIN_CHUNK]).unwrap();
        }
        drop(tx);

        handle.mark_stopped();
        assert_eq!(handle.take_stdout().map(|out| out.len()), Some(64 * DRAIN_CHUNK));
    }

    #[test]
    fn test_streams_are_taken_once() {
        let mut manager = TargetProcessManager {
            handle: Some(
                ProcessHandle::new(7)
                    .with_stdout(Box::new(Cursor::new(b"hello\n".to_vec())))
                    .with_stderr(Box::new(Cursor::new(b"warn\n".to_vec()))),
            ),
        };
        manager.mark_stopped();

        let mut out = Vec::new();
        let mut err = Vec::new();
        assert_eq!(manager.drain_output(&mut out, &mut err).unwrap(), 11);
        assert_eq!(out, b"hello\n");
        assert_eq!(err, b"warn\n");

        // 二回目は既にストリームを手放している
        assert_eq!(manager.drain_output(&mut out, &mut err).unwrap(), 0);
    }

    #[test]
    fn test_exit_code_recorded_on_handle() {
        let mut manager = TargetProcessManager::new();
        manager.record_exit(1);
        assert_eq!(manager.exit_code(), None);

        manager.handle = Some(ProcessHandle::new(7));
        manager.record_exit(3);
        assert_eq!(manager.exit_code(), Some(3));
    }
}
