//! The causal context (`root`, `chain`, `depth`, `deadline`) carried on every
//! CALL and RESPONSE, plus the id generator used for request ids and the
//! context's own root id.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, IpcError, Result};

/// Milliseconds since the Unix epoch. Used for `deadline` comparisons so the
/// wire representation stays a plain integer across the JSON and MessagePack
/// codecs.
pub type Millis = i64;

pub fn now_millis() -> Millis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as Millis
}

fn random_suffix() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Generates an id of the form `"{prefix}-{ms-since-epoch}-{6-char base36 random}"`.
/// Uniqueness per process is sufficient; ids are opaque to the router.
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}-{}-{}", now_millis(), random_suffix())
}

/// The distributed call context propagated with every CALL/RESPONSE to
/// preserve causal identity and a shared absolute deadline.
///
/// Invariant: `deadline` is copied unchanged across every extension and every
/// network hop; only the origin sets it. Invariant: `depth` never decreases
/// along a causal path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcContext {
    pub root: String,
    pub chain: Vec<String>,
    pub depth: u32,
    pub deadline: Millis,
}

impl IpcContext {
    /// Creates a fresh context rooted at `service_name`, with an absolute
    /// deadline `timeout_ms` from now.
    pub fn create(service_name: impl Into<String>, timeout_ms: i64) -> Self {
        IpcContext {
            root: generate_id("root"),
            chain: vec![service_name.into()],
            depth: 1,
            deadline: now_millis() + timeout_ms,
        }
    }

    /// Appends `service_name` to `chain` and increments `depth`, copying
    /// `root` and `deadline` unchanged.
    pub fn extend(&self, service_name: impl Into<String>) -> Self {
        let mut chain = self.chain.clone();
        chain.push(service_name.into());
        IpcContext {
            root: self.root.clone(),
            chain,
            depth: self.depth + 1,
            deadline: self.deadline,
        }
    }

    /// `true` once `now` has passed `deadline`. Monotonic: if this returns
    /// `true` at some wall-clock time, it returns `true` at every later time.
    pub fn is_deadline_exceeded(&self) -> bool {
        now_millis() > self.deadline
    }

    /// Milliseconds remaining until `deadline`, clamped to zero.
    pub fn remaining_ms(&self) -> i64 {
        (self.deadline - now_millis()).max(0)
    }

    /// `depth` never decreases along a causal path; this checks it against a
    /// configured cap (spec default 100).
    pub fn exceeds_depth_cap(&self, cap: u32) -> bool {
        self.depth > cap
    }

    /// Structural validation: `root` non-empty, `chain` non-empty, `depth >= 1`.
    /// `deadline` is any integer (a context already past its deadline is still
    /// "valid" in shape; staleness is a separate check).
    pub fn validate(&self) -> Result<()> {
        if self.root.is_empty() {
            return Err(IpcError::InvalidContext("root must not be empty".into()));
        }
        if self.chain.is_empty() {
            return Err(IpcError::InvalidContext("chain must not be empty".into()));
        }
        if self.depth < 1 {
            return Err(IpcError::InvalidContext("depth must be >= 1".into()));
        }
        if self.depth as usize != self.chain.len() {
            return Err(IpcError::InvalidContext(
                "depth must equal chain length".into(),
            ));
        }
        Ok(())
    }

    pub fn deadline_error(&self) -> IpcError {
        IpcError::Remote(crate::error::RemoteError::new(
            ErrorCode::DeadlineExceeded,
            format!("deadline {} exceeded", self.deadline),
        ))
    }

    pub fn depth_error(&self, cap: u32) -> IpcError {
        IpcError::Remote(crate::error::RemoteError::new(
            ErrorCode::MaxDepthExceeded,
            format!("depth {} exceeds cap {cap}", self.depth),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_sets_chain_and_depth() {
        let ctx = IpcContext::create("svc-a", 5_000);
        assert_eq!(ctx.chain, vec!["svc-a".to_string()]);
        assert_eq!(ctx.depth, 1);
        assert!(ctx.deadline > now_millis());
    }

    #[test]
    fn extend_twice_matches_testable_property() {
        let c = IpcContext::create("origin", 1_000);
        let extended = c.extend("a").extend("b");
        assert_eq!(extended.chain, vec!["origin", "a", "b"]);
        assert_eq!(extended.depth, c.depth + 2);
        assert_eq!(extended.deadline, c.deadline);
        assert_eq!(extended.root, c.root);
    }

    #[test]
    fn deadline_exceeded_is_monotonic_once_true() {
        let mut ctx = IpcContext::create("svc", 0);
        // timeout_ms = 0 means deadline == now_millis() at construction; the
        // clock has already advanced past it by the time we check.
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(ctx.is_deadline_exceeded());
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(ctx.is_deadline_exceeded());
        // Mutating chain/depth doesn't resurrect an expired deadline.
        ctx = ctx.extend("next");
        assert!(ctx.is_deadline_exceeded());
    }

    #[test]
    fn depth_cap_check() {
        let mut ctx = IpcContext::create("a", 1_000);
        for i in 0..99 {
            ctx = ctx.extend(format!("hop-{i}"));
        }
        assert_eq!(ctx.depth, 100);
        assert!(!ctx.exceeds_depth_cap(100));
        ctx = ctx.extend("one-too-many");
        assert!(ctx.exceeds_depth_cap(100));
    }

    #[test]
    fn validate_rejects_empty_root_and_chain() {
        let mut ctx = IpcContext::create("a", 1_000);
        ctx.root.clear();
        assert!(ctx.validate().is_err());

        let mut ctx = IpcContext::create("a", 1_000);
        ctx.chain.clear();
        assert!(ctx.validate().is_err());
    }

    #[test]
    fn generate_id_uses_prefix_and_is_unique_enough() {
        let a = generate_id("req");
        let b = generate_id("req");
        assert!(a.starts_with("req-"));
        assert_ne!(a, b);
    }
}
