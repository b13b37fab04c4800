use std::collections::HashSet;

use log::debug;

use super::{SpeakerSegment, TranscriptSegment};

/// Minimum share of a transcript segment a speaker turn must cover.
const MIN_OVERLAP_RATIO: f64 = 0.25;

/// Labels each transcript segment with the speaker whose turn overlaps it
/// most, and returns the number of distinct speakers assigned.
pub fn assign_speakers(segments: &mut [TranscriptSegment], speakers: &[SpeakerSegment]) -> u32 {
    let mut seen: HashSet<&str> = HashSet::new();

    for segment in segments.iter_mut() {
        let duration = segment.end - segment.start;
        let best = speakers
            .iter()
            .filter_map(|turn| {
                let overlap = (segment.end.min(turn.end) - segment.start.max(turn.start)).max(0.0);
                if overlap <= 0.0 || duration <= 0.0 {
                    return None;
                }
                Some((turn, overlap / duration))
            })
            .fold(None, |best: Option<(&SpeakerSegment, f64)>, (turn, ratio)| match best {
                Some((_, best_ratio)) if best_ratio >= ratio => best,
                _ => Some((turn, ratio)),
            });

        match best {
            Some((turn, ratio)) if ratio >= MIN_OVERLAP_RATIO => {
                segment.speaker = Some(turn.speaker.clone());
                seen.insert(turn.speaker.as_str());
            }
            _ => {
                debug!(
                    "Segment [{:.1}s-{:.1}s] has no speaker turn above threshold",
                    segment.start, segment.end
                );
            }
        }
    }

    seen.len() as u32
}
