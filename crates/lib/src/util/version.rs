//! Loose version ordering for package index entries.
//!
//! Index versions are not guaranteed to be semver (`1.26`, `2.31.0`,
//! `1.0rc1` all occur), so segments are compared numerically where both
//! sides are numbers and lexically otherwise. Missing trailing segments
//! count as zero, making `1.2` equal to `1.2.0`.

use std::cmp::Ordering;

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
  Number(u64),
  Text(&'a str),
}

fn segments(version: &str) -> Vec<Segment<'_>> {
  version
    .split(['.', '-', '+'])
    .filter(|s| !s.is_empty())
    .map(|s| match s.parse::<u64>() {
      Ok(n) => Segment::Number(n),
      Err(_) => Segment::Text(s),
    })
    .collect()
}

/// Compare two version strings.
pub fn compare(a: &str, b: &str) -> Ordering {
  let left = segments(a);
  let right = segments(b);
  let len = left.len().max(right.len());

  for i in 0..len {
    let ord = match (left.get(i), right.get(i)) {
      (Some(Segment::Number(x)), Some(Segment::Number(y))) => x.cmp(y),
      (Some(Segment::Number(x)), None) => x.cmp(&0),
      (None, Some(Segment::Number(y))) => 0.cmp(y),
      // A number outranks a pre-release tag at the same position
      (Some(Segment::Number(_)), Some(Segment::Text(_))) => Ordering::Greater,
      (Some(Segment::Text(_)), Some(Segment::Number(_))) => Ordering::Less,
      (Some(Segment::Text(x)), Some(Segment::Text(y))) => x.cmp(y),
      (Some(Segment::Text(_)), None) => Ordering::Less,
      (None, Some(Segment::Text(_))) => Ordering::Greater,
      (None, None) => Ordering::Equal,
    };
    if ord != Ordering::Equal {
      return ord;
    }
  }

  Ordering::Equal
}

/// Pick the highest version from a list.
pub fn latest<'a, I>(versions: I) -> Option<&'a str>
where
  I: IntoIterator<Item = &'a str>,
{
  versions.into_iter().max_by(|a, b| compare(a, b))
}
