#![forbid(unsafe_code)]

//! Audio format descriptors and the two ranking rules used to pick one.
//!
//! Both extraction sources describe their renditions differently. They are
//! normalized into [`FormatDescriptor`] so selection can run over either
//! source's output, while each source keeps its own [`Ranking`].

/// Content type used when the chosen format does not declare one.
pub const DEFAULT_MIME_TYPE: &str = "audio/mpeg";

/// Tags pinned to known-good audio encodings, highest priority first.
/// 141 is AAC 256k, 251 is Opus ~160k, 140 is AAC 128k.
const PINNED_TAGS: [(&str, u64); 3] = [("141", 100), ("251", 90), ("140", 80)];

/// Base priority for formats that do not carry a pinned tag.
const UNPINNED_BASE_PRIORITY: u64 = 10;

/// One fetchable rendition of a media item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormatDescriptor {
    /// `itag` for the music API, `format_id` for yt-dlp. Always compared as text.
    pub tag: String,
    pub audio_quality: Option<String>,
    pub mime_type: Option<String>,
    pub bitrate: Option<u64>,
    pub average_bitrate: Option<f64>,
    pub total_bitrate: Option<f64>,
    pub audio_codec: Option<String>,
    pub video_codec: Option<String>,
    pub url: Option<String>,
}

impl FormatDescriptor {
    fn has_url(&self) -> bool {
        self.url.as_deref().is_some_and(|url| !url.is_empty())
    }

    /// Audio-capable entries with a direct URL are the only ones the pinned
    /// ranking considers.
    pub fn is_audio_candidate(&self) -> bool {
        let declares_audio = self.audio_quality.is_some()
            || self
                .mime_type
                .as_deref()
                .is_some_and(|mime| mime.starts_with("audio/"));
        declares_audio && self.has_url()
    }

    /// Mirrors yt-dlp's notion of an audio-only format: it has an audio codec
    /// (or does not say) and explicitly has no video codec.
    pub fn is_audio_only(&self) -> bool {
        self.audio_codec.as_deref() != Some("none") && self.video_codec.as_deref() == Some("none")
    }

    /// MIME type without parameters, e.g. `audio/webm` for
    /// `audio/webm; codecs="opus"`.
    pub fn mime_essence(&self) -> Option<&str> {
        self.mime_type
            .as_deref()
            .map(mime_essence)
            .filter(|essence| !essence.is_empty())
    }
}

/// Which rule a candidate list should be ranked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ranking {
    /// Fixed itag preferences, then bitrate. Used for the music API.
    PinnedTags,
    /// Highest average bitrate, falling back to total bitrate. Used for yt-dlp.
    AverageBitrate,
}

impl Ranking {
    pub fn select<'a>(&self, formats: &'a [FormatDescriptor]) -> Option<&'a FormatDescriptor> {
        match self {
            Ranking::PinnedTags => select_pinned(formats),
            Ranking::AverageBitrate => select_by_average_bitrate(formats),
        }
    }
}

pub fn mime_essence(raw: &str) -> &str {
    raw.split(';').next().unwrap_or(raw).trim()
}

pub fn pinned_priority(format: &FormatDescriptor) -> u64 {
    PINNED_TAGS
        .iter()
        .find(|(tag, _)| *tag == format.tag)
        .map(|(_, priority)| *priority)
        .unwrap_or_else(|| UNPINNED_BASE_PRIORITY + format.bitrate.unwrap_or(0) / 1000)
}

/// Picks the qualifying format with the highest pinned priority. Ties keep
/// the earliest entry.
pub fn select_pinned(formats: &[FormatDescriptor]) -> Option<&FormatDescriptor> {
    first_max_by_key(
        formats.iter().filter(|format| format.is_audio_candidate()),
        pinned_priority,
    )
}

fn secondary_bitrate(format: &FormatDescriptor) -> f64 {
    format
        .average_bitrate
        .filter(|abr| *abr != 0.0)
        .or(format.total_bitrate)
        .unwrap_or(0.0)
}

/// Picks the format with the highest average bitrate among audio-only entries,
/// or among every entry when none is audio-only. Ties keep the earliest entry.
pub fn select_by_average_bitrate(formats: &[FormatDescriptor]) -> Option<&FormatDescriptor> {
    let fetchable: Vec<&FormatDescriptor> = formats.iter().filter(|f| f.has_url()).collect();
    let audio_only: Vec<&FormatDescriptor> = fetchable
        .iter()
        .copied()
        .filter(|format| format.is_audio_only())
        .collect();
    let pool = if audio_only.is_empty() {
        fetchable
    } else {
        audio_only
    };
    first_max_by_key(pool.into_iter(), secondary_bitrate)
}

// `Iterator::max_by` keeps the last maximum; selection must keep the first.
fn first_max_by_key<'a, K, I, F>(items: I, key: F) -> Option<&'a FormatDescriptor>
where
    I: Iterator<Item = &'a FormatDescriptor>,
    K: PartialOrd,
    F: Fn(&FormatDescriptor) -> K,
{
    let mut best: Option<(&FormatDescriptor, K)> = None;
    for item in items {
        let value = key(item);
        match &best {
            Some((_, current)) if value <= *current => {}
            _ => best = Some((item, value)),
        }
    }
    best.map(|(item, _)| item)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(tag: &str, bitrate: Option<u64>, url: Option<&str>) -> FormatDescriptor {
        FormatDescriptor {
            tag: tag.into(),
            mime_type: Some("audio/webm; codecs=\"opus\"".into()),
            bitrate,
            url: url.map(str::to_string),
            ..FormatDescriptor::default()
        }
    }

    fn ytdlp(id: &str, abr: Option<f64>, tbr: Option<f64>, vcodec: &str) -> FormatDescriptor {
        FormatDescriptor {
            tag: id.into(),
            average_bitrate: abr,
            total_bitrate: tbr,
            audio_codec: Some("opus".into()),
            video_codec: Some(vcodec.into()),
            url: Some(format!("https://media.test/{id}")),
            ..FormatDescriptor::default()
        }
    }

    #[test]
    fn pinned_high_quality_tag_beats_typical_bitrates() {
        let formats = vec![
            audio("249", Some(56_000), Some("http://low-opus")),
            audio("250", Some(78_000), Some("http://mid-opus")),
            audio("251", Some(160_000), Some("http://opus")),
            audio("141", Some(1), Some("http://aac")),
        ];
        let best = select_pinned(&formats).unwrap();
        assert_eq!(best.tag, "141");
    }

    #[test]
    fn unpinned_bitrate_above_ninety_kbps_outranks_pinned_tag() {
        let below = vec![
            audio("141", None, Some("http://aac")),
            audio("600", Some(89_999), Some("http://below")),
        ];
        assert_eq!(pinned_priority(&below[1]), 99);
        assert_eq!(select_pinned(&below).unwrap().tag, "141");

        let at_threshold = vec![
            audio("141", None, Some("http://aac")),
            audio("600", Some(90_000), Some("http://at-threshold")),
        ];
        assert_eq!(pinned_priority(&at_threshold[1]), 100);
        // A tie keeps the first entry.
        assert_eq!(select_pinned(&at_threshold).unwrap().tag, "141");

        let well_above = vec![
            audio("141", None, Some("http://aac")),
            audio("600", Some(91_000), Some("http://well-above")),
        ];
        assert_eq!(select_pinned(&well_above).unwrap().tag, "600");
    }

    #[test]
    fn pinned_tags_rank_in_fixed_order() {
        let formats = vec![
            audio("140", None, Some("http://low")),
            audio("251", None, Some("http://medium")),
        ];
        assert_eq!(select_pinned(&formats).unwrap().tag, "251");
        assert_eq!(pinned_priority(&formats[0]), 80);
        assert_eq!(pinned_priority(&formats[1]), 90);
    }

    #[test]
    fn unpinned_formats_rank_by_truncated_bitrate() {
        let formats = vec![
            audio("249", Some(50_999), Some("http://a")),
            audio("250", Some(70_000), Some("http://b")),
            audio("600", None, Some("http://c")),
        ];
        assert_eq!(pinned_priority(&formats[0]), 60);
        assert_eq!(pinned_priority(&formats[2]), 10);
        assert_eq!(select_pinned(&formats).unwrap().tag, "250");
    }

    #[test]
    fn equal_priorities_keep_first_entry() {
        // Both truncate to the same priority.
        let formats = vec![
            audio("249", Some(50_100), Some("http://first")),
            audio("250", Some(50_900), Some("http://second")),
        ];
        let best = select_pinned(&formats).unwrap();
        assert_eq!(best.url.as_deref(), Some("http://first"));
    }

    #[test]
    fn non_audio_and_urlless_formats_never_qualify() {
        let video = FormatDescriptor {
            tag: "141".into(),
            mime_type: Some("video/mp4".into()),
            url: Some("http://video".into()),
            ..FormatDescriptor::default()
        };
        let ciphered = audio("251", Some(160_000), None);
        assert!(select_pinned(&[video, ciphered]).is_none());
        assert!(select_pinned(&[]).is_none());
    }

    #[test]
    fn audio_quality_alone_qualifies() {
        let muxed = FormatDescriptor {
            tag: "18".into(),
            audio_quality: Some("AUDIO_QUALITY_LOW".into()),
            mime_type: Some("video/mp4; codecs=\"avc1.42001E, mp4a.40.2\"".into()),
            url: Some("http://muxed".into()),
            ..FormatDescriptor::default()
        };
        assert_eq!(select_pinned(&[muxed]).unwrap().tag, "18");
    }

    #[test]
    fn mime_essence_strips_parameters() {
        let format = audio("251", None, Some("http://x"));
        assert_eq!(format.mime_essence(), Some("audio/webm"));
        let blank = FormatDescriptor {
            mime_type: Some(" ; codecs=x".into()),
            ..FormatDescriptor::default()
        };
        assert_eq!(blank.mime_essence(), None);
    }

    #[test]
    fn average_bitrate_prefers_audio_only_entries() {
        let formats = vec![
            ytdlp("18", Some(400.0), None, "avc1"),
            ytdlp("140", Some(129.5), None, "none"),
            ytdlp("251", Some(135.0), None, "none"),
        ];
        assert_eq!(select_by_average_bitrate(&formats).unwrap().tag, "251");
    }

    #[test]
    fn average_bitrate_falls_back_to_total_bitrate() {
        let formats = vec![
            ytdlp("a", Some(0.0), Some(90.0), "none"),
            ytdlp("b", Some(80.0), Some(500.0), "none"),
            ytdlp("c", None, None, "none"),
        ];
        assert_eq!(select_by_average_bitrate(&formats).unwrap().tag, "a");
    }

    #[test]
    fn average_bitrate_uses_every_entry_without_audio_only() {
        let formats = vec![
            ytdlp("18", Some(96.0), None, "avc1"),
            ytdlp("22", Some(192.0), None, "avc1"),
            ytdlp("37", Some(192.0), None, "avc1"),
        ];
        assert_eq!(select_by_average_bitrate(&formats).unwrap().tag, "22");
    }

    #[test]
    fn ranking_dispatches_to_rule() {
        let formats = vec![
            FormatDescriptor {
                tag: "141".into(),
                mime_type: Some("audio/mp4".into()),
                average_bitrate: Some(1.0),
                video_codec: Some("none".into()),
                url: Some("http://pinned".into()),
                ..FormatDescriptor::default()
            },
            FormatDescriptor {
                tag: "x".into(),
                mime_type: Some("audio/mp4".into()),
                average_bitrate: Some(320.0),
                video_codec: Some("none".into()),
                url: Some("http://loud".into()),
                ..FormatDescriptor::default()
            },
        ];
        assert_eq!(Ranking::PinnedTags.select(&formats).unwrap().tag, "141");
        assert_eq!(Ranking::AverageBitrate.select(&formats).unwrap().tag, "x");
    }
}
