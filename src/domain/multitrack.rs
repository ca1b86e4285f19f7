use std::{
    cell::OnceCell,
    collections::BTreeMap,
    fmt::Display,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    domain::{
        annotation::Annotation,
        audio::{AudioLoader, Signal},
        schema::AnnotationKind,
        track::{
            AUDIO_ROLE, Track, TrackContext, cached_annotation, fmt_entry, load_audio,
            resolve_paths,
        },
    },
    error::{DatasetError, Result},
};

/// A group of tracks whose audio sums to a mixture, with its own files.
#[derive(Debug)]
pub struct MultiTrack {
    pub mtrack_id: String,
    pub track_ids: Vec<String>,
    pub tracks: BTreeMap<String, Track>,
    ctx: Arc<TrackContext>,
    paths: BTreeMap<String, Option<PathBuf>>,
    annotations: BTreeMap<String, OnceCell<Option<Annotation>>>,
}

impl MultiTrack {
    pub fn new(
        ctx: Arc<TrackContext>,
        mtrack_id: &str,
        metadata: impl Fn(&str) -> Option<serde_json::Value>,
    ) -> Result<Self> {
        let entry =
            ctx.manifest
                .multitrack(mtrack_id)
                .ok_or_else(|| DatasetError::UnknownMultiTrack {
                    mtrack_id: mtrack_id.to_string(),
                    dataset: ctx.dataset.clone(),
                })?;

        let tracks = entry
            .tracks
            .iter()
            .map(|id| Ok((id.clone(), Track::new(ctx.clone(), id, metadata(id))?)))
            .collect::<Result<BTreeMap<_, _>>>()
            .map_err(|e| match e {
                DatasetError::UnknownTrack { track_id, .. } => DatasetError::BrokenReference {
                    mtrack_id: mtrack_id.to_string(),
                    track_id,
                },
                e => e,
            })?;

        let annotations = entry
            .files
            .keys()
            .filter(|role| {
                ctx.schema
                    .role(role)
                    .is_some_and(|spec| spec.kind != AnnotationKind::Audio)
            })
            .map(|role| (role.clone(), OnceCell::new()))
            .collect();

        Ok(Self {
            mtrack_id: mtrack_id.to_string(),
            track_ids: entry.tracks.clone(),
            tracks,
            paths: resolve_paths(&ctx.data_home, &entry.files, &Default::default()),
            annotations,
            ctx,
        })
    }

    pub fn path(&self, role: &str) -> Option<&Path> {
        self.paths.get(role).and_then(|p| p.as_deref())
    }

    pub fn paths(&self) -> &BTreeMap<String, Option<PathBuf>> {
        &self.paths
    }

    pub fn annotation(&self, role: &str) -> Result<Option<&Annotation>> {
        cached_annotation(&self.ctx, &self.annotations, &self.paths, role)
    }

    /// Audio of one of the multitrack's own files, e.g. a premixed file.
    pub fn audio_of(&self, role: &str, loader: &dyn AudioLoader) -> Result<Option<Signal>> {
        load_audio(&self.ctx, &self.paths, role, loader)
    }

    /// Linear mixture of the members' audio.
    ///
    /// All signals are resampled to the rate of the first one. With
    /// `enforce_length` signals of different lengths are an error, otherwise
    /// shorter signals are zero padded. Weights default to 1 and must be
    /// non-negative, one per track key. With `average` the mixture is divided
    /// by the sum of the weights.
    pub fn get_target(
        &self,
        loader: &dyn AudioLoader,
        track_keys: &[&str],
        weights: Option<&[f32]>,
        average: bool,
        enforce_length: bool,
    ) -> Result<Signal> {
        if track_keys.is_empty() {
            return Err(DatasetError::Mix("no tracks to mix".to_string()));
        }
        let weights = match weights {
            Some(w) if w.len() != track_keys.len() => {
                return Err(DatasetError::Mix(format!(
                    "got {} weights for {} tracks",
                    w.len(),
                    track_keys.len()
                )));
            }
            Some(w) if w.iter().any(|w| *w < 0.0 || !w.is_finite()) => {
                return Err(DatasetError::Mix(format!(
                    "weights must be non-negative, got {w:?}"
                )));
            }
            Some(w) => w.to_vec(),
            None => vec![1.0; track_keys.len()],
        };

        let mut signals = Vec::with_capacity(track_keys.len());
        for key in track_keys {
            let track = self.tracks.get(*key).ok_or_else(|| DatasetError::UnknownTrack {
                track_id: key.to_string(),
                dataset: format!("{}/{}", self.ctx.dataset, self.mtrack_id),
            })?;
            let signal = track
                .audio(loader)?
                .ok_or_else(|| DatasetError::Mix(format!("track '{key}' has no audio file")))?;
            signals.push(signal);
        }

        mix(signals, &weights, average, enforce_length)
    }

    /// Average of all members with unit weights.
    pub fn get_mix(&self, loader: &dyn AudioLoader) -> Result<Signal> {
        let keys: Vec<&str> = self.track_ids.iter().map(String::as_str).collect();
        self.get_target(loader, &keys, None, true, true)
    }

    /// Audio of a member track, by id.
    pub fn track_audio(&self, track_id: &str, loader: &dyn AudioLoader) -> Result<Option<Signal>> {
        let track = self.tracks.get(track_id).ok_or_else(|| DatasetError::UnknownTrack {
            track_id: track_id.to_string(),
            dataset: format!("{}/{}", self.ctx.dataset, self.mtrack_id),
        })?;
        track.audio_of(AUDIO_ROLE, loader)
    }
}

/// Weighted sum of signals, resampled to the first signal's rate.
pub fn mix(
    signals: Vec<Signal>,
    weights: &[f32],
    average: bool,
    enforce_length: bool,
) -> Result<Signal> {
    let Some(target_sr) = signals.first().map(|s| s.sample_rate) else {
        return Err(DatasetError::Mix("no signals to mix".to_string()));
    };
    let total_weight: f32 = weights.iter().sum();
    if average && total_weight == 0.0 {
        return Err(DatasetError::Mix("weights sum to zero".to_string()));
    }

    let signals = signals
        .into_iter()
        .map(|s| s.resample(target_sr))
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(DatasetError::Audio)?;

    let len = signals.iter().map(|s| s.samples.len()).max().unwrap_or(0);
    if enforce_length && signals.iter().any(|s| s.samples.len() != len) {
        let lens: Vec<usize> = signals.iter().map(|s| s.samples.len()).collect();
        return Err(DatasetError::Mix(format!(
            "signals have different lengths {lens:?}"
        )));
    }

    let mut out = vec![0.0f32; len];
    for (signal, weight) in signals.iter().zip(weights) {
        for (o, s) in out.iter_mut().zip(&signal.samples) {
            *o += weight * s;
        }
    }
    if average {
        out.iter_mut().for_each(|o| *o /= total_weight);
    }

    Ok(Signal::new(out, target_sr))
}

impl Display for MultiTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt_entry(
            f,
            "MultiTrack",
            "mtrack_id",
            &self.mtrack_id,
            &self.ctx,
            &self.paths,
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::domain::{
        audio::{WavLoader, tests::write_wav},
        track::tests::context,
    };

    fn setup(tmp: &TempDir) -> MultiTrack {
        std::fs::create_dir_all(tmp.path().join("audio")).unwrap();
        write_wav(&tmp.path().join("audio/t1.wav"), &[1.0, 1.0, 1.0], 8000);
        write_wav(&tmp.path().join("audio/t2.wav"), &[0.0, 0.5, -1.0], 8000);
        MultiTrack::new(context(tmp.path()), "m1", |_| None).unwrap()
    }

    #[test]
    fn unknown_multitrack_id() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            MultiTrack::new(context(tmp.path()), "nope", |_| None),
            Err(DatasetError::UnknownMultiTrack { .. })
        ));
    }

    #[test]
    fn members_and_own_paths() {
        let tmp = TempDir::new().unwrap();
        let mtrack = MultiTrack::new(context(tmp.path()), "m1", |_| None).unwrap();

        assert_eq!(mtrack.track_ids, vec!["t1", "t2"]);
        assert_eq!(mtrack.tracks.len(), 2);
        assert_eq!(mtrack.path("mix"), Some(tmp.path().join("mix/m1.wav").as_path()));
        assert!(mtrack.to_string().starts_with("MultiTrack(\n  mtrack_id=\"m1\","));
    }

    #[test]
    fn mix_averages_members() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let mtrack = setup(&tmp);

        let mixed = mtrack.get_mix(&WavLoader)?;
        assert_eq!(mixed.sample_rate, 8000);
        assert_eq!(mixed.samples, vec![0.5, 0.75, 0.0]);
        Ok(())
    }

    #[test]
    fn weighted_sum_without_average() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let mtrack = setup(&tmp);

        let target = mtrack.get_target(&WavLoader, &["t1", "t2"], Some(&[2.0, 1.0]), false, true)?;
        assert_eq!(target.samples, vec![2.0, 2.5, 1.0]);

        let averaged =
            mtrack.get_target(&WavLoader, &["t1", "t2"], Some(&[3.0, 1.0]), true, true)?;
        assert_eq!(averaged.samples, vec![0.75, 0.875, 0.5]);
        Ok(())
    }

    #[test]
    fn weight_preconditions() {
        let tmp = TempDir::new().unwrap();
        let mtrack = setup(&tmp);

        assert!(matches!(
            mtrack.get_target(&WavLoader, &["t1", "t2"], Some(&[1.0]), true, true),
            Err(DatasetError::Mix(_))
        ));
        assert!(matches!(
            mtrack.get_target(&WavLoader, &["t1", "t2"], Some(&[1.0, -1.0]), true, true),
            Err(DatasetError::Mix(_))
        ));
        assert!(matches!(
            mtrack.get_target(&WavLoader, &["t1", "t2"], Some(&[0.0, 0.0]), true, true),
            Err(DatasetError::Mix(_))
        ));
        assert!(matches!(
            mtrack.get_target(&WavLoader, &["t3"], None, true, true),
            Err(DatasetError::UnknownTrack { .. })
        ));
    }

    #[test]
    fn length_mismatch_pads_or_fails() -> anyhow::Result<()> {
        let signals = || {
            vec![
                Signal::new(vec![1.0, 1.0, 1.0, 1.0], 100),
                Signal::new(vec![1.0, 1.0], 100),
            ]
        };

        assert!(matches!(
            mix(signals(), &[1.0, 1.0], true, true),
            Err(DatasetError::Mix(_))
        ));

        let padded = mix(signals(), &[1.0, 1.0], false, false)?;
        assert_eq!(padded.samples, vec![2.0, 2.0, 1.0, 1.0]);
        Ok(())
    }

    #[test]
    fn mix_resamples_members_to_first_rate() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        std::fs::create_dir_all(tmp.path().join("audio"))?;

        // same quarter second at two rates, silent then 0.5 from the middle
        let step = |len: usize| {
            let mut samples = vec![0.0f32; len];
            samples[len / 2..].fill(0.5);
            samples
        };
        write_wav(&tmp.path().join("audio/t1.wav"), &step(4000), 16000);
        write_wav(&tmp.path().join("audio/t2.wav"), &step(2000), 8000);
        let mtrack = MultiTrack::new(context(tmp.path()), "m1", |_| None)?;

        let mixed = mtrack.get_mix(&WavLoader)?;
        assert_eq!(mixed.sample_rate, 16000);
        assert_eq!(mixed.samples.len(), 4000);
        assert!(mixed.samples[..1600].iter().all(|s| s.abs() < 0.05));
        assert!(mixed.samples[2400..3600].iter().all(|s| (s - 0.5).abs() < 0.05));

        let padded = mix(
            vec![Signal::new(step(4000), 16000), Signal::new(step(2000), 8000)],
            &[1.0, 1.0],
            false,
            false,
        )?;
        assert_eq!(padded.samples.len(), 4000);
        assert!((padded.samples[3500] - 1.0).abs() < 0.05);
        Ok(())
    }

    #[test]
    fn member_without_audio_file_on_disk() {
        let tmp = TempDir::new().unwrap();
        let mtrack = MultiTrack::new(context(tmp.path()), "m1", |_| None).unwrap();
        assert!(matches!(
            mtrack.get_mix(&WavLoader),
            Err(DatasetError::NotFound { .. })
        ));
    }
}
