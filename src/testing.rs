//! In-memory stand-in for a coqtop process.
//!
//! [`ScriptedCoqtop`] records every `<call>` written to it and answers each
//! one with the next scripted reply. A call with no reply left closes the
//! output, which the engine sees as the process dying.
//!
//! ```
//! use coqtop_codes::testing::ScriptedCoqtop;
//! use coqtop_codes::Engine;
//!
//! let coqtop = ScriptedCoqtop::new();
//! coqtop.reply(ScriptedCoqtop::init_ok(1));
//! let engine = Engine::new();
//! engine.start(coqtop.channel())?;
//! assert_eq!(engine.active_count(), 1);
//! # Ok::<(), coqtop_codes::Error>(())
//! ```

use crate::transport::Channel;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};

const CALL_END: &[u8] = b"</call>";

#[derive(Debug)]
struct Script {
    replies: VecDeque<String>,
    output: VecDeque<u8>,
    partial_call: Vec<u8>,
    calls: Vec<String>,
    chunk_size: usize,
    closed: bool,
}

/// Scripted fake coqtop. Clones share the same script.
#[derive(Debug, Clone)]
pub struct ScriptedCoqtop {
    script: Arc<Mutex<Script>>,
}

impl Default for ScriptedCoqtop {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCoqtop {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                replies: VecDeque::new(),
                output: VecDeque::new(),
                partial_call: Vec::new(),
                calls: Vec::new(),
                chunk_size: crate::transport::READ_CHUNK,
                closed: false,
            })),
        }
    }

    /// Hand out output at most `size` bytes per read.
    pub fn with_chunk_size(self, size: usize) -> Self {
        self.with_script(|s| s.chunk_size = size.max(1));
        self
    }

    /// Queue the output for the next unanswered call.
    pub fn reply<S: Into<String>>(&self, xml: S) {
        let xml = xml.into();
        self.with_script(|s| s.replies.push_back(xml));
    }

    /// Make output readable right away, without waiting for a call.
    pub fn emit(&self, xml: &str) {
        self.with_script(|s| s.output.extend(xml.as_bytes()));
    }

    /// Every complete call received so far.
    pub fn calls(&self) -> Vec<String> {
        self.with_script(|s| s.calls.clone())
    }

    /// Simulate the process exiting.
    pub fn close(&self) {
        self.with_script(|s| s.closed = true);
    }

    pub fn is_closed(&self) -> bool {
        self.with_script(|s| s.closed)
    }

    /// A channel connected to this script.
    pub fn channel(&self) -> Channel {
        Channel::new(
            Box::new(ScriptReader(self.script.clone())),
            Box::new(ScriptWriter(self.script.clone())),
        )
    }

    /// Successful `Init` answer.
    pub fn init_ok(state: i64) -> String {
        format!(r#"<value val="good"><state_id val="{}"/></value>"#, state)
    }

    /// Successful `Add` answer.
    pub fn add_ok(state: i64) -> String {
        format!(
            concat!(
                r#"<value val="good"><pair><state_id val="{}"/>"#,
                r#"<pair><union val="in_l"><unit/></union><string></string></pair></pair></value>"#
            ),
            state
        )
    }

    fn with_script<T>(&self, f: impl FnOnce(&mut Script) -> T) -> T {
        f(&mut self.script.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

struct ScriptReader(Arc<Mutex<Script>>);

impl Read for ScriptReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut script = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let n = script.chunk_size.min(buf.len()).min(script.output.len());
        for (slot, byte) in buf.iter_mut().zip(script.output.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

struct ScriptWriter(Arc<Mutex<Script>>);

impl Write for ScriptWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut script = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if script.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "coqtop exited"));
        }
        script.partial_call.extend_from_slice(buf);

        while let Some(end) = script
            .partial_call
            .windows(CALL_END.len())
            .position(|w| w == CALL_END)
        {
            let call: Vec<u8> = script.partial_call.drain(..end + CALL_END.len()).collect();
            script.calls.push(String::from_utf8_lossy(&call).into_owned());
            match script.replies.pop_front() {
                Some(reply) => script.output.extend(reply.into_bytes()),
                None => script.closed = true,
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_follows_call() {
        let coqtop = ScriptedCoqtop::new().with_chunk_size(4);
        coqtop.reply("<unit/>");
        let mut writer = ScriptWriter(coqtop.script.clone());
        let mut reader = ScriptReader(coqtop.script.clone());

        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);

        writer.write_all(b"<call val=\"Goal\">").unwrap();
        assert!(coqtop.calls().is_empty());
        writer.write_all(b"<unit/></call>").unwrap();
        assert_eq!(coqtop.calls(), vec![r#"<call val="Goal"><unit/></call>"#]);

        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"<uni");
        assert_eq!(reader.read(&mut buf).unwrap(), 3);
    }

    #[test]
    fn test_unanswered_call_closes() {
        let coqtop = ScriptedCoqtop::new();
        let mut writer = ScriptWriter(coqtop.script.clone());
        writer.write_all(b"<call val=\"Init\"/></call>").unwrap();
        assert!(coqtop.is_closed());
        assert!(writer.write_all(b"<call").is_err());
    }
}
