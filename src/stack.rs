//! Lazy call-stack references and frame string rendering
//!
//! A lifetime record never stores frames eagerly; it keeps the (thread,
//! timestamp) key captured at creation and resolves it on demand against a
//! shared read-only stack source. With millions of records in flight this is
//! the difference between a bounded working set and an unbounded one.

/// Key for resolving the call stack captured at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackRef {
    pub thread: u32,
    pub timestamp: i64,
}

/// One resolved stack frame. Either half may be unknown when symbols are
/// missing for the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub module: Option<String>,
    pub function: Option<String>,
}

/// A resolved call stack, frames innermost first (capture order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStack {
    pub frames: Vec<Frame>,
    /// Stack belongs to the idle thread
    pub idle: bool,
}

/// Capability for resolving stack references against trace symbol data.
///
/// Implemented by the trace backend; the core only consumes it.
pub trait StackResolver {
    /// Resolve the stack for `stack_ref`, or `None` when the source has no
    /// stack recorded at that point.
    fn resolve(&self, stack_ref: StackRef) -> Option<ResolvedStack>;
}

/// Render a resolved stack as path segments, outermost frame first.
///
/// Unavailable stacks render as a single `"N/A"` segment, idle stacks as
/// `"[Idle]"`; everything else starts at `"[Root]"` followed by
/// `module!function` per frame with `?` standing in for unresolved halves.
pub fn stack_strings(stack: Option<&ResolvedStack>) -> Vec<String> {
    let stack = match stack {
        Some(s) if !s.frames.is_empty() => s,
        _ => return vec!["N/A".to_string()],
    };

    if stack.idle {
        return vec!["[Idle]".to_string()];
    }

    let mut result = Vec::with_capacity(stack.frames.len() + 1);
    result.push("[Root]".to_string());
    for frame in stack.frames.iter().rev() {
        let module = frame.module.as_deref().unwrap_or("?");
        let function = frame.function.as_deref().unwrap_or("?");
        result.push(format!("{module}!{function}"));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(module: &str, function: &str) -> Frame {
        Frame {
            module: Some(module.to_string()),
            function: Some(function.to_string()),
        }
    }

    #[test]
    fn test_stack_strings_unavailable() {
        assert_eq!(stack_strings(None), vec!["N/A"]);

        let empty = ResolvedStack {
            frames: vec![],
            idle: false,
        };
        assert_eq!(stack_strings(Some(&empty)), vec!["N/A"]);
    }

    #[test]
    fn test_stack_strings_idle() {
        let idle = ResolvedStack {
            frames: vec![frame("ntoskrnl.exe", "KiIdleLoop")],
            idle: true,
        };
        assert_eq!(stack_strings(Some(&idle)), vec!["[Idle]"]);
    }

    #[test]
    fn test_stack_strings_outermost_first() {
        // Frames are stored innermost first; rendering reverses them.
        let stack = ResolvedStack {
            frames: vec![frame("lib.dll", "inner"), frame("app.exe", "main")],
            idle: false,
        };
        assert_eq!(
            stack_strings(Some(&stack)),
            vec!["[Root]", "app.exe!main", "lib.dll!inner"]
        );
    }

    #[test]
    fn test_stack_strings_missing_symbols() {
        let stack = ResolvedStack {
            frames: vec![Frame {
                module: Some("app.exe".to_string()),
                function: None,
            }],
            idle: false,
        };
        assert_eq!(stack_strings(Some(&stack)), vec!["[Root]", "app.exe!?"]);
    }
}
