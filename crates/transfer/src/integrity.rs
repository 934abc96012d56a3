//! S3-style integrity tags.
//!
//! Part tags are the hex MD5 of the part body; a multipart object's tag is the
//! MD5 of the concatenated part digests suffixed with the part count.

use md5::{Digest, Md5};

/// Hex MD5 of a part body.
pub fn part_etag(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Tag of an object assembled from parts with the given tags.
pub fn multipart_etag<S: AsRef<str>>(part_tags: &[S]) -> String {
    let mut hasher = Md5::new();
    for tag in part_tags {
        let tag = tag.as_ref();
        match hex::decode(tag) {
            Ok(raw) => hasher.update(&raw),
            Err(_) => hasher.update(tag.as_bytes()),
        }
    }
    format!("{}-{}", hex::encode(hasher.finalize()), part_tags.len())
}
