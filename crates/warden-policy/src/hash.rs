//! Content hashing for pre-approved operations.

use sha2::{Digest, Sha256};

/// SHA-256 over the command and each argument, each prefixed with its byte
/// length so `("a b", [])` and `("a", ["b"])` hash differently.
///
/// Keys are verbatim: a different spacing or argument order is a different
/// operation.
#[must_use]
pub fn operation_hash<S: AsRef<str>>(command: &str, args: &[S]) -> String {
    let mut hasher = Sha256::new();
    feed(&mut hasher, command);
    for arg in args {
        feed(&mut hasher, arg.as_ref());
    }
    hex::encode(hasher.finalize())
}

fn feed(hasher: &mut Sha256, part: &str) {
    hasher.update((part.len() as u64).to_be_bytes());
    hasher.update(part.as_bytes());
}
