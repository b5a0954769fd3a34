//! KeyCodec (C2, spec §4.1) — deterministic, collision-resistant key
//! derivation from heterogeneous call arguments.
//!
//! Follows the cache-key pattern in `response_cache.rs::cache_key` /
//! `embedding_cache.rs::cache_key`: feed a canonical byte encoding into
//! SHA-256 and render the digest as a hex string. The type-tag bytes below
//! are what make that encoding "type-discriminating" (spec: "the integer 1
//! and the string "1" never collide").

use std::collections::BTreeSet;
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// An opaque, hashable, orderable cache key: the hex SHA-256 digest produced
/// by [`derive_key`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(pub String);

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Type tags used to discriminate scalar encodings. Part of the wire
/// contract of [`Encodable`] implementors — changing a tag changes every
/// key derived from that type, so these are deliberately explicit bytes
/// rather than, say, `TypeId` (which is not stable across compilations).
mod tag {
    pub const BOOL: u8 = 0;
    pub const INT: u8 = 1;
    pub const FLOAT: u8 = 2;
    pub const STRING: u8 = 3;
    pub const SEQUENCE: u8 = 4;
    pub const SET: u8 = 5;
    pub const MAP: u8 = 6;
    pub const IDENTITY: u8 = 7;
    pub const NONE: u8 = 8;
}

/// A value that can contribute a canonical, order-sensitive byte encoding to
/// a key digest. The closed variant set named in spec §9 ("a small, closed
/// variant set — scalar, ordered sequence, unordered set, mapping,
/// identity-fallback — and user-extension is via a registered encoder, not
/// runtime reflection") is realized as: implement this trait.
pub trait Encodable {
    fn encode(&self, hasher: &mut Sha256);
}

macro_rules! impl_encodable_int {
    ($($t:ty),+) => {
        $(
            impl Encodable for $t {
                fn encode(&self, hasher: &mut Sha256) {
                    hasher.update([tag::INT]);
                    hasher.update(self.to_string().as_bytes());
                }
            }
        )+
    };
}

impl_encodable_int!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

impl Encodable for bool {
    fn encode(&self, hasher: &mut Sha256) {
        hasher.update([tag::BOOL, u8::from(*self)]);
    }
}

impl Encodable for f64 {
    fn encode(&self, hasher: &mut Sha256) {
        hasher.update([tag::FLOAT]);
        // Canonical string form per spec §4.1: consistent formatting so
        // the same float always produces the same bytes.
        hasher.update(format!("{self:?}").as_bytes());
    }
}

impl Encodable for f32 {
    fn encode(&self, hasher: &mut Sha256) {
        (*self as f64).encode(hasher);
    }
}

impl Encodable for str {
    fn encode(&self, hasher: &mut Sha256) {
        hasher.update([tag::STRING]);
        hasher.update(self.as_bytes());
    }
}

impl Encodable for String {
    fn encode(&self, hasher: &mut Sha256) {
        self.as_str().encode(hasher);
    }
}

impl<T: Encodable + ?Sized> Encodable for &T {
    fn encode(&self, hasher: &mut Sha256) {
        (**self).encode(hasher);
    }
}

impl<T: Encodable> Encodable for Option<T> {
    fn encode(&self, hasher: &mut Sha256) {
        match self {
            None => hasher.update([tag::NONE]),
            Some(v) => v.encode(hasher),
        }
    }
}

/// Ordered-container encoding: order preserved, per spec §4.1.
impl<T: Encodable> Encodable for [T] {
    fn encode(&self, hasher: &mut Sha256) {
        hasher.update([tag::SEQUENCE]);
        hasher.update((self.len() as u64).to_le_bytes());
        for item in self {
            item.encode(hasher);
        }
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn encode(&self, hasher: &mut Sha256) {
        self.as_slice().encode(hasher)
    }
}

/// Unordered-container wrapper: per spec §4.1, unordered containers must be
/// sorted by their element digest before hashing so that `{1, 2} == {2, 1}`.
/// Wrapping rather than blanket-implementing over `HashSet<T>` keeps the
/// "closed variant set" explicit (spec §9) instead of relying on a
/// particular collection type.
pub struct UnorderedSet<'a, T: Encodable>(pub &'a [T]);

impl<'a, T: Encodable> Encodable for UnorderedSet<'a, T> {
    fn encode(&self, hasher: &mut Sha256) {
        let mut digests: BTreeSet<Vec<u8>> = BTreeSet::new();
        for item in self.0 {
            let mut h = Sha256::new();
            item.encode(&mut h);
            digests.insert(h.finalize().to_vec());
        }
        hasher.update([tag::SET]);
        hasher.update((digests.len() as u64).to_le_bytes());
        for d in digests {
            hasher.update(&d);
        }
    }
}

/// Mapping encoding: entries sorted by key digest (an unordered container of
/// key-value pairs), per spec §4.1.
pub struct Mapping<'a, K: Encodable, V: Encodable>(pub &'a [(K, V)]);

impl<'a, K: Encodable, V: Encodable> Encodable for Mapping<'a, K, V> {
    fn encode(&self, hasher: &mut Sha256) {
        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = self
            .0
            .iter()
            .map(|(k, v)| {
                let mut hk = Sha256::new();
                k.encode(&mut hk);
                let mut hv = Sha256::new();
                v.encode(&mut hv);
                (hk.finalize().to_vec(), hv.finalize().to_vec())
            })
            .collect();
        entries.sort();
        hasher.update([tag::MAP]);
        hasher.update((entries.len() as u64).to_le_bytes());
        for (k, v) in entries {
            hasher.update(&k);
            hasher.update(&v);
        }
    }
}

/// Identity-fallback encoding for arbitrary user objects with no natural
/// serialisation (spec §4.1): encodes the `Arc`'s heap address.
///
/// **Documented explicitly**: identity-keyed caching only deduplicates the
/// *same* `Arc` instance, never structurally equal ones built separately.
/// This is the codec's "never raise" failure mode — any `T` can be wrapped
/// this way, so key derivation always produces *some* key deterministically
/// for the lifetime of that `Arc`.
pub struct ByIdentity<T: ?Sized>(pub Arc<T>);

impl<T: ?Sized> Encodable for ByIdentity<T> {
    fn encode(&self, hasher: &mut Sha256) {
        hasher.update([tag::IDENTITY]);
        let ptr = Arc::as_ptr(&self.0) as *const () as usize;
        hasher.update(ptr.to_le_bytes());
    }
}

/// Derive a [`CacheKey`] from positional arguments, dropping the first
/// `skip_args` of them (spec §4.1: "`skip_args = n` instructs the codec to
/// ignore the first `n` positional arguments — used to drop `self`/`cls`
/// from method keys").
pub fn derive_key(args: &[&dyn Encodable], skip_args: usize) -> CacheKey {
    let mut hasher = Sha256::new();
    for arg in args.iter().skip(skip_args) {
        arg.encode(&mut hasher);
        hasher.update([0xff]); // argument separator
    }
    CacheKey(format!("{:x}", hasher.finalize()))
}
