//! Evaluation trace
//!
//! A stack of labelled frames. `push`/`pop` bracket a span of evaluation and
//! every message lands in the innermost open frame. When tracing is disabled
//! every method returns immediately; messages are taken as `impl Display` so
//! callers can pass `format_args!` and nothing is formatted or allocated.

use std::fmt::{self, Display, Write as _};

const ROOT_LABEL: &str = "root";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Log(String),
    Observation(String),
    Verdict { allowed: bool, message: String },
    Child(usize),
}

#[derive(Debug, Clone)]
struct Frame {
    label: String,
    entries: Vec<Entry>,
}

/// Stack-scoped explainability log for one simulation
#[derive(Debug, Clone, Default)]
pub struct Trace {
    enabled: bool,
    frames: Vec<Frame>,
    stack: Vec<usize>,
}

impl Trace {
    /// Create a trace; a disabled trace records nothing
    pub fn new(enabled: bool) -> Self {
        if !enabled {
            return Trace::default();
        }
        Trace {
            enabled,
            frames: vec![Frame {
                label: ROOT_LABEL.to_string(),
                entries: Vec::new(),
            }],
            stack: vec![0],
        }
    }

    pub fn disabled() -> Self {
        Trace::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Open a child frame of the current frame
    pub fn push(&mut self, label: impl Display) {
        if !self.enabled {
            return;
        }
        let index = self.frames.len();
        self.frames.push(Frame {
            label: label.to_string(),
            entries: Vec::new(),
        });
        self.current().entries.push(Entry::Child(index));
        self.stack.push(index);
    }

    /// Close the current frame; the root frame is never closed
    pub fn pop(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
    }

    /// Number of open frames, counting the root
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn log(&mut self, message: impl Display) {
        if self.enabled {
            let entry = Entry::Log(message.to_string());
            self.current().entries.push(entry);
        }
    }

    pub fn observation(&mut self, message: impl Display) {
        if self.enabled {
            let entry = Entry::Observation(message.to_string());
            self.current().entries.push(entry);
        }
    }

    /// Record a terminal allow verdict
    pub fn allowed(&mut self, message: impl Display) {
        self.verdict(true, message);
    }

    /// Record a terminal deny verdict
    pub fn denied(&mut self, message: impl Display) {
        self.verdict(false, message);
    }

    fn verdict(&mut self, allowed: bool, message: impl Display) {
        if self.enabled {
            let entry = Entry::Verdict {
                allowed,
                message: message.to_string(),
            };
            self.current().entries.push(entry);
        }
    }

    fn current(&mut self) -> &mut Frame {
        let index = self.stack.last().copied().unwrap_or(0);
        &mut self.frames[index]
    }

    /// Render every recorded frame and message as indented text
    pub fn explain(&self) -> String {
        let mut out = String::new();
        if !self.frames.is_empty() {
            self.render(0, 0, &mut out);
        }
        out
    }

    fn render(&self, index: usize, depth: usize, out: &mut String) {
        let frame = &self.frames[index];
        let indent = "  ".repeat(depth);
        let _ = writeln!(out, "{}{}", indent, frame.label);

        for entry in &frame.entries {
            match entry {
                Entry::Log(msg) => {
                    let _ = writeln!(out, "{}  {}", indent, msg);
                }
                Entry::Observation(msg) => {
                    let _ = writeln!(out, "{}  observed: {}", indent, msg);
                }
                Entry::Verdict { allowed, message } => {
                    let tag = if *allowed { "ALLOW" } else { "DENY" };
                    let _ = writeln!(out, "{}  {}: {}", indent, tag, message);
                }
                Entry::Child(child) => self.render(*child, depth + 1, out),
            }
        }
    }
}

impl Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.explain())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_records_nothing() {
        let mut trace = Trace::disabled();
        trace.push("frame");
        trace.log(format_args!("value {}", 1));
        trace.allowed("ok");
        trace.pop();

        assert!(!trace.is_enabled());
        assert_eq!(trace.depth(), 0);
        assert_eq!(trace.explain(), "");
    }

    #[test]
    fn test_nested_frames() {
        let mut trace = Trace::new(true);
        trace.log("start");
        trace.push("principal");
        trace.push(format_args!("policy {}", "inline"));
        trace.observation("statement matched");
        trace.pop();
        trace.allowed("identity allows");
        trace.pop();
        trace.denied("final");

        let expected = "\
root
  start
  principal
    policy inline
      observed: statement matched
    ALLOW: identity allows
  DENY: final
";
        assert_eq!(trace.explain(), expected);
        assert_eq!(trace.to_string(), expected);
    }

    #[test]
    fn test_pop_never_removes_root() {
        let mut trace = Trace::new(true);
        trace.pop();
        trace.pop();
        assert_eq!(trace.depth(), 1);

        trace.log("still recorded");
        assert!(trace.explain().contains("still recorded"));
    }
}
