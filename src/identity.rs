//! Stable content identifiers for feed items.
//!
//! Every ingested item is keyed by a digest of the source link and the item's
//! GUID. The digest is compared against hashes already persisted for the
//! source, so it has to produce the same bytes across restarts and releases:
//! 64-bit FNV-1, rendered as 16 lowercase hex digits.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Separator between the source link and the item id in the hashed input.
const SEPARATOR: &str = "||";

/// Computes the content hash for an item of a source.
///
/// When `guid` is empty the item's `raw_link` is used instead, so feeds that
/// omit GUIDs still yield one distinct hash per article.
///
/// ```
/// use feedrelay::identity::identify;
///
/// let a = identify("https://example.com/feed.xml", "", "https://example.com/article/1");
/// let b = identify("https://example.com/feed.xml", "", "https://example.com/article/2");
/// assert_ne!(a, b);
/// ```
pub fn identify(source_link: &str, guid: &str, raw_link: &str) -> String {
    let effective_id = if guid.is_empty() { raw_link } else { guid };

    let digest = [source_link, SEPARATOR, effective_id]
        .iter()
        .flat_map(|part| part.bytes())
        .fold(FNV_OFFSET_BASIS, |hash, byte| {
            hash.wrapping_mul(FNV_PRIME) ^ u64::from(byte)
        });

    format!("{:016x}", digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_hashes() {
        assert_eq!(
            identify(
                "http://www.ruanyifeng.com/blog/atom.xml",
                "tag:www.ruanyifeng.com,2019:/blog//1.2054",
                ""
            ),
            "7d35fb910816ebb4"
        );
        assert_eq!(
            identify(
                "https://rsshub.app/guokr/scientific",
                "https://www.guokr.com/article/445877/",
                ""
            ),
            "561e4b5acbae7324"
        );
    }

    #[test]
    fn test_empty_guid_falls_back_to_raw_link() {
        let feed = "https://example.com/feed.xml";
        assert_eq!(
            identify(feed, "", "https://example.com/article/1"),
            "61157afb127305d6"
        );
        assert_eq!(
            identify(feed, "", "https://example.com/article/2"),
            "61157afb127305d5"
        );
    }

    #[test]
    fn test_guid_takes_precedence_over_raw_link() {
        let feed = "https://example.com/feed.xml";
        assert_eq!(
            identify(feed, "guid-1", "https://example.com/a"),
            identify(feed, "guid-1", "https://example.com/b")
        );
    }

    #[test]
    fn test_same_guid_different_sources_differ() {
        assert_ne!(
            identify("https://a.example.com/feed", "1", ""),
            identify("https://b.example.com/feed", "1", "")
        );
    }

    #[test]
    fn test_hash_is_sixteen_hex_digits() {
        let hash = identify("", "", "");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    proptest! {
        #[test]
        fn prop_identify_is_deterministic(link in ".*", guid in ".*", raw in ".*") {
            prop_assert_eq!(identify(&link, &guid, &raw), identify(&link, &guid, &raw));
        }

        #[test]
        fn prop_empty_guid_distinguishes_raw_links(
            link in "https://[a-z]{1,10}\\.com/feed",
            raw1 in "https://[a-z]{1,10}\\.com/[a-z0-9]{1,12}",
            raw2 in "https://[a-z]{1,10}\\.com/[a-z0-9]{1,12}",
        ) {
            prop_assume!(raw1 != raw2);
            prop_assert_ne!(identify(&link, "", &raw1), identify(&link, "", &raw2));
        }
    }
}
