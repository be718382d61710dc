//! Summing rendered tracks into one output buffer.

/// One track's contribution to the mix.
#[derive(Clone, Copy, Debug)]
pub struct MixInput<'a> {
    pub samples: &'a [f32],
    /// Offset on the shared timeline, in analysis frames.
    pub start_frame: usize,
    pub volume: f32,
    pub muted: bool,
    pub solo: bool,
}

/// Mix the audible tracks. When any track is soloed only soloed tracks play,
/// muted or not; otherwise every unmuted track plays. Returns `None` when
/// nothing is audible.
pub fn mix_tracks(inputs: &[MixInput<'_>], hop_size: usize) -> Option<Vec<f32>> {
    let any_solo = inputs.iter().any(|t| t.solo);
    let audible: Vec<&MixInput<'_>> = inputs
        .iter()
        .filter(|t| if any_solo { t.solo } else { !t.muted })
        .filter(|t| !t.samples.is_empty())
        .collect();

    let len = audible
        .iter()
        .map(|t| t.start_frame * hop_size + t.samples.len())
        .max()?;

    let mut out = vec![0.0f32; len];
    for track in &audible {
        let offset = track.start_frame * hop_size;
        for (o, s) in out[offset..offset + track.samples.len()]
            .iter_mut()
            .zip(track.samples)
        {
            *o += s * track.volume;
        }
    }
    log::debug!("Mixed {} of {} track(s) into {} samples", audible.len(), inputs.len(), len);
    Some(out)
}
