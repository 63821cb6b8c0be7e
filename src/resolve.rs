use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::header::{IF_RANGE, RANGE};
use axum_extra::headers::{Header, HeaderMap, HeaderValue, LastModified};
use tracing::{debug, trace};

use crate::etag::{self, EntityTag};
use crate::ByteRange;

/// Metadata of the entity a range request is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityMeta {
    pub size: u64,
    pub mtime: Option<SystemTime>,
}

impl EntityMeta {
    pub fn new(size: u64) -> Self {
        EntityMeta { size, mtime: None }
    }

    pub fn with_mtime(mut self, mtime: SystemTime) -> Self {
        self.mtime = Some(mtime);
        self
    }
}

/// Verdict of [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeResolution {
    /// `None`: serve the full entity with 200 (no range requested, or the
    /// `If-Range` precondition failed). `Some`: serve 206 with these ranges,
    /// in request order.
    Satisfiable(Option<Vec<ByteRange>>),
    /// Serve 416 without a body.
    Unsatisfiable,
}

impl RangeResolution {
    pub fn is_satisfiable(&self) -> bool {
        matches!(self, RangeResolution::Satisfiable(_))
    }

    /// The ranges to serve, if a partial response applies.
    pub fn ranges(&self) -> Option<&[ByteRange]> {
        match self {
            RangeResolution::Satisfiable(Some(ranges)) => Some(ranges),
            _ => None,
        }
    }
}

/// Resolves the `Range` and `If-Range` request headers against an entity.
///
/// `content` is only needed to compute the entity's strong tag when
/// `If-Range` carries one; without it a strong tag never matches.
pub fn resolve(headers: &HeaderMap, entity: &EntityMeta, content: Option<&[u8]>) -> RangeResolution {
    if let Some(if_range) = headers.get(IF_RANGE) {
        if !if_range_holds(if_range, entity, content) {
            debug!(?if_range, "If-Range precondition failed, serving full entity");
            return RangeResolution::Satisfiable(None);
        }
    }

    let Some(range) = headers.get(RANGE) else {
        return RangeResolution::Satisfiable(None);
    };

    let parsed = range
        .to_str()
        .ok()
        .and_then(|value| parse_range(value, entity.size));

    match parsed {
        Some(ranges) => {
            trace!(?ranges, size = entity.size, "range header satisfiable");
            RangeResolution::Satisfiable(Some(ranges))
        }
        None => {
            debug!(?range, size = entity.size, "range header unsatisfiable");
            RangeResolution::Unsatisfiable
        }
    }
}

fn if_range_holds(value: &HeaderValue, entity: &EntityMeta, content: Option<&[u8]>) -> bool {
    let Ok(text) = value.to_str() else {
        return false;
    };

    match EntityTag::parse(text) {
        // weak tags never satisfy a range precondition
        Some(EntityTag::Weak(_)) => false,
        Some(EntityTag::Strong(tag)) => match content {
            Some(content) => etag::strong(content) == tag,
            None => false,
        },
        None => {
            let Ok(date) = LastModified::decode(&mut std::iter::once(value)) else {
                return false;
            };
            let date = unix_seconds(SystemTime::from(date));
            match entity.mtime.and_then(unix_seconds) {
                None => true,
                Some(mtime) => matches!(date, Some(date) if date < mtime),
            }
        }
    }
}

fn unix_seconds(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH).ok().map(|since| since.as_secs())
}

/// Parses a `Range` header value against a resource of `size` bytes.
///
/// Returns `None` when the unit is not `bytes` or any single range spec is
/// malformed or out of bounds. Ranges keep their request order and are
/// neither merged nor deduplicated.
pub fn parse_range(value: &str, size: u64) -> Option<Vec<ByteRange>> {
    let (unit, specs) = value.split_once('=')?;
    if unit != "bytes" {
        return None;
    }

    specs
        .split(',')
        .map(|spec| parse_spec(spec.trim(), size))
        .collect()
}

fn parse_spec(spec: &str, size: u64) -> Option<ByteRange> {
    let (first, last) = spec.split_once('-')?;

    let (start, end) = match (first.is_empty(), last.is_empty()) {
        (true, true) => return None,
        // suffix: the final `last` bytes
        (true, false) => (size.checked_sub(parse_digits(last)?)?, size.checked_sub(1)?),
        (false, true) => (parse_digits(first)?, size.checked_sub(1)?),
        (false, false) => (parse_digits(first)?, parse_digits(last)?),
    };

    let range = ByteRange::new(start, end);
    range.fits(size).then_some(range)
}

fn parse_digits(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
