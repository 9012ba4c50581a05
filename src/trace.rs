use std::{
    fs,
    io::{self, BufRead, BufReader, Read},
    path::{Path, PathBuf},
    thread::{self, JoinHandle},
};

use crossbeam::channel::{Receiver, Sender};
use xz2::read::XzDecoder;

use crate::cache::Op;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceOp {
    pub op: Op,
    pub addr: u64,
}

/// Parses one `<op> <addr>` line. Comments, blank lines, unknown op codes and
/// anything else that doesn't fit yield `None`.
pub fn parse_line(line: &str) -> Option<TraceOp> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let mut parts = line.split_whitespace();
    let mut code = parts.next()?.chars();
    let op = Op::from_code(code.next()?)?;
    if code.next().is_some() {
        return None;
    }
    let addr = parse_addr(parts.next()?)?;
    Some(TraceOp { op, addr })
}

fn parse_addr(s: &str) -> Option<u64> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn open(path: &Path) -> io::Result<Box<dyn Read + Send>> {
    let file = fs::File::open(path)?;
    if path.extension().is_some_and(|ext| ext == "xz") {
        Ok(Box::new(XzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Splits on `\n` and decodes lossily, so stray binary just fails to parse.
fn for_each_op<R: BufRead>(mut reader: R, mut f: impl FnMut(TraceOp) -> bool) -> io::Result<()> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        if let Some(op) = parse_line(&String::from_utf8_lossy(&buf)) {
            if !f(op) {
                return Ok(());
            }
        }
    }
}

pub fn parse_trace<R: BufRead>(reader: R) -> io::Result<Vec<TraceOp>> {
    let mut ops = Vec::new();
    for_each_op(reader, |op| {
        ops.push(op);
        true
    })?;
    Ok(ops)
}

/// Loads a whole trace file (`.xz` is decompressed).
pub fn read_all(path: impl AsRef<Path>) -> io::Result<Vec<TraceOp>> {
    parse_trace(BufReader::new(open(path.as_ref())?))
}

/// Chunks are grown on demand past this many ops.
const MAX_CHUNK_PREALLOC: usize = 4096;

/// A trace file streamed in chunks by a reader thread.
///
/// The channel is bounded, so the reader stays at most `chunks_per_queue`
/// chunks ahead of the simulation. An I/O error ends the stream after being
/// delivered as the last item, and so does a reader thread that died.
pub struct Trace {
    pub rec: Receiver<io::Result<Vec<TraceOp>>>,
    thread: Option<JoinHandle<()>>,
}

impl Trace {
    pub fn read(path: PathBuf, ops_per_chunk: usize, chunks_per_queue: usize) -> io::Result<Trace> {
        Trace::from_reader(open(&path)?, ops_per_chunk, chunks_per_queue)
    }

    pub fn from_reader(
        stream: Box<dyn Read + Send>,
        ops_per_chunk: usize,
        chunks_per_queue: usize,
    ) -> io::Result<Trace> {
        let (sender, receiver) = crossbeam::channel::bounded(chunks_per_queue);

        let t = thread::Builder::new()
            .name("trace-reader".to_string())
            .spawn(move || Trace::run_thread(stream, ops_per_chunk.max(1), sender))?;

        Ok(Trace {
            rec: receiver,
            thread: Some(t),
        })
    }

    fn run_thread(
        stream: Box<dyn Read + Send>,
        ops_per_chunk: usize,
        queue: Sender<io::Result<Vec<TraceOp>>>,
    ) {
        let new_chunk = || Vec::with_capacity(ops_per_chunk.min(MAX_CHUNK_PREALLOC));
        let mut chunk = new_chunk();
        let mut receiver_gone = false;
        let res = for_each_op(BufReader::new(stream), |op| {
            chunk.push(op);
            if chunk.len() == ops_per_chunk {
                let full = std::mem::replace(&mut chunk, new_chunk());
                receiver_gone = queue.send(Ok(full)).is_err();
            }
            !receiver_gone
        });
        if receiver_gone {
            return;
        }

        if !chunk.is_empty() && queue.send(Ok(chunk)).is_err() {
            return;
        }
        if let Err(err) = res {
            log::error!("trace reader stopped: {err}");
            let _ = queue.send(Err(err));
        }
    }

    /// Waits for the reader thread once the channel has closed. A panic in
    /// the reader comes back as an error instead of a short trace.
    fn join(&mut self) -> Option<io::Error> {
        let handle = self.thread.take()?;
        match handle.join() {
            Ok(()) => None,
            Err(_) => {
                log::error!("trace reader thread panicked");
                Some(io::Error::other("trace reader thread panicked"))
            }
        }
    }

    /// Every operation in file order; stops at the first I/O error.
    pub fn ops(&mut self) -> impl Iterator<Item = io::Result<TraceOp>> + '_ {
        let chunks = self.rec.clone().into_iter();
        chunks
            .flat_map(|chunk| -> Box<dyn Iterator<Item = io::Result<TraceOp>>> {
                match chunk {
                    Ok(ops) => Box::new(ops.into_iter().map(Ok)),
                    Err(err) => Box::new(std::iter::once(Err(err))),
                }
            })
            .chain(std::iter::from_fn(move || self.join().map(Err)))
    }
}
