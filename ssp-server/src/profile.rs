//! # profile
//!
//! ProfileEngine: owns the processed cast and its frozen raw copy, and
//! implements the editing operations applied before a cast is transmitted.
//!
//! ## Invariants
//! - Every operation keeps the sample columns the same length.
//! - The raw copy is written once by `store_raw` and never mutated.
//! - Thinning tracks survivors in a dedicated `retained` mask; the reject
//!   flag column is only touched after the simplification has finished.

use ssp_types::{interp, Column, Flag, Profile, Sample, SampleSource};
use thiserror::Error;
use tracing::{debug, info};

/// Tolerance (m/s) used when thinning a cast for transmission.
pub const TX_THIN_TOLERANCE: f64 = 0.1;

#[derive(Debug, Error, PartialEq)]
pub enum ProfileError {
    #[error("operation requires a non-empty profile")]
    Empty,
    #[error("invalid range [{0}, {1}]")]
    InvalidRange(f64, f64),
    #[error("no raw copy has been stored")]
    NoRawCopy,
}

/// Flag toggle direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagMode {
    Reject,
    Restore,
}

impl FlagMode {
    fn flag(self) -> Flag {
        match self {
            Self::Reject => Flag::Reject,
            Self::Restore => Flag::Keep,
        }
    }
}

/// Which half of a yo-yo cast survives `reduce_up_down`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastDirection {
    Down,
    Up,
}

// ── Engine ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ProfileEngine {
    profile: Profile,
    raw: Option<Profile>,
}

impl ProfileEngine {
    pub fn new(mut profile: Profile) -> Self {
        profile.normalize_columns();
        Self { profile, raw: None }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn raw(&self) -> Option<&Profile> {
        self.raw.as_ref()
    }

    pub fn into_profile(self) -> Profile {
        self.profile
    }

    pub fn len(&self) -> usize {
        self.profile.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profile.is_empty()
    }

    /// Add a constant offset to every speed (refraction corrector).
    pub fn offset_speed(&mut self, offset: f64) {
        for s in self.profile.speed.iter_mut() {
            *s += offset;
        }
    }

    /// Overwrite speed on every sample shallower than `depth`.
    pub fn overwrite_speed_above(&mut self, depth: f64, speed: f64) -> usize {
        let mut n = 0;
        for (d, s) in self.profile.depth.iter().zip(self.profile.speed.iter_mut()) {
            if *d < depth {
                *s = speed;
                n += 1;
            }
        }
        n
    }

    // ── insert ────────────────────────────────────────────────────────────

    /// Insert one sample keeping depth order.
    ///
    /// The table is depth-sorted first. A sample at an existing depth replaces
    /// the given values of that row and keeps the rest. Appending past the
    /// last sample or prepending before the first copies any omitted value
    /// from the adjacent sample. Interior inserts interpolate omitted values
    /// between the two neighbours.
    pub fn insert_sample(
        &mut self,
        depth: f64,
        speed: Option<f64>,
        temperature: Option<f64>,
        salinity: Option<f64>,
        source: SampleSource,
        flag: Flag,
    ) -> Result<(), ProfileError> {
        if self.profile.is_empty() {
            return Err(ProfileError::Empty);
        }
        if depth.is_nan() {
            return Err(ProfileError::InvalidRange(depth, depth));
        }
        self.sort_by_depth();

        let p = &mut self.profile;
        let last = p.len() - 1;
        let at = p.depth.partition_point(|d| *d < depth);

        if at <= last && p.depth[at] == depth {
            let old = p.sample(at);
            p.speed[at] = speed.unwrap_or(old.speed);
            p.temperature[at] = temperature.unwrap_or(old.temperature);
            p.salinity[at] = salinity.unwrap_or(old.salinity);
            p.source[at] = source;
            p.flag[at] = flag;
            debug!("Profile: replaced sample at {depth:.2} m");
            return Ok(());
        }

        if at > last {
            let prev = p.sample(last);
            p.push(Sample {
                depth,
                speed: speed.unwrap_or(prev.speed),
                temperature: temperature.unwrap_or(prev.temperature),
                salinity: salinity.unwrap_or(prev.salinity),
                source,
                flag,
            });
        } else if at == 0 {
            let next = p.sample(0);
            p.insert(0, Sample {
                depth,
                speed: speed.unwrap_or(next.speed),
                temperature: temperature.unwrap_or(next.temperature),
                salinity: salinity.unwrap_or(next.salinity),
                source,
                flag,
            });
        } else {
            let xs = [p.depth[at - 1], p.depth[at]];
            let lerp = |col: &[f64]| interp(depth, &xs, &[col[at - 1], col[at]]).unwrap_or(col[at]);
            let sample = Sample {
                depth,
                speed: speed.unwrap_or_else(|| lerp(&p.speed)),
                temperature: temperature.unwrap_or_else(|| lerp(&p.temperature)),
                salinity: salinity.unwrap_or_else(|| lerp(&p.salinity)),
                source,
                flag,
            };
            p.insert(at, sample);
        }
        debug!("Profile: inserted sample at {depth:.2} m ({} samples)", p.len());
        Ok(())
    }

    /// Stable sort of every column by depth. No-op on an ordered table.
    fn sort_by_depth(&mut self) {
        let p = &mut self.profile;
        if p.depth.windows(2).all(|w| w[0] <= w[1]) {
            return;
        }
        let mut order: Vec<usize> = (0..p.len()).collect();
        order.sort_by(|a, b| p.depth[*a].total_cmp(&p.depth[*b]));
        fn permute<T: Copy>(v: &mut Vec<T>, order: &[usize]) {
            *v = order.iter().map(|i| v[*i]).collect();
        }
        permute(&mut p.depth, &order);
        permute(&mut p.speed, &order);
        permute(&mut p.temperature, &order);
        permute(&mut p.salinity, &order);
        permute(&mut p.source, &order);
        permute(&mut p.flag, &order);
        debug!("Profile: re-sorted {} samples by depth", p.len());
    }

    // ── extend ────────────────────────────────────────────────────────────

    /// Append the samples of `extender` deeper than the current max valid depth.
    /// Returns the number of appended samples.
    pub fn extend(&mut self, extender: &Profile, tag: SampleSource) -> usize {
        if extender.is_empty() {
            return 0;
        }
        let max_depth = self.profile.max_valid_depth().unwrap_or(0.0);
        let mut added = 0;
        for s in extender.samples().filter(|s| s.depth > max_depth) {
            self.profile.push(Sample { source: tag, ..s });
            added += 1;
        }
        if added > 0 {
            info!("Profile: extended with {added} samples below {max_depth:.1} m ({tag:?})");
        }
        added
    }

    // ── flags ─────────────────────────────────────────────────────────────

    /// Set or clear the reject flag on samples inside both ranges.
    /// Range bounds may be given in either order. Returns how many samples matched.
    pub fn toggle_flag(
        &mut self,
        depth_range: (f64, f64),
        value_range: (f64, f64),
        column: Column,
        mode: FlagMode,
    ) -> Result<usize, ProfileError> {
        let (d_min, d_max) = normalize_range(depth_range)?;
        let (v_min, v_max) = normalize_range(value_range)?;
        let flag = mode.flag();
        let p = &mut self.profile;
        let mut n = 0;
        for i in 0..p.len() {
            let d = p.depth[i];
            let v = p.column(column)[i];
            if d >= d_min && d <= d_max && v >= v_min && v <= v_max {
                p.flag[i] = flag;
                n += 1;
            }
        }
        Ok(n)
    }

    /// Drop every rejected sample.
    pub fn purge_flagged(&mut self) -> usize {
        let keep: Vec<bool> = self.profile.flag.iter().map(|f| *f == Flag::Keep).collect();
        let before = self.profile.len();
        self.profile.retain_rows(&keep);
        before - self.profile.len()
    }

    // ── thinning ──────────────────────────────────────────────────────────

    /// Purge rejected samples, sort by depth, then simplify the depth/speed
    /// curve so that no dropped sample deviates from its chord by more than
    /// `tolerance` m/s.
    /// Returns the number of samples removed by the simplification.
    pub fn thin(&mut self, tolerance: f64) -> Result<usize, ProfileError> {
        if tolerance.is_nan() || tolerance < 0.0 {
            return Err(ProfileError::InvalidRange(tolerance, tolerance));
        }
        self.purge_flagged();
        if self.profile.is_empty() {
            return Err(ProfileError::Empty);
        }
        self.sort_by_depth();
        let retained = douglas_peucker(&self.profile.depth, &self.profile.speed, tolerance);
        let before = self.profile.len();
        self.profile.retain_rows(&retained);
        let removed = before - self.profile.len();
        debug!("Profile: thinned {before} → {} samples (tol {tolerance} m/s)", self.profile.len());
        Ok(removed)
    }

    // ── resampling ────────────────────────────────────────────────────────

    /// Replace `column` with `source`'s column interpolated on the current depths.
    pub fn replace_column(&mut self, source: &Profile, column: Column) -> Result<(), ProfileError> {
        let src = source.clean_sorted();
        if src.is_empty() {
            return Err(ProfileError::Empty);
        }
        let depths = self.profile.depth.clone();
        let values: Vec<f64> = depths
            .iter()
            .filter_map(|d| interp(*d, &src.depth, src.column(column)))
            .collect();
        *self.profile.column_mut(column) = values;
        self.modify_source_info(&format!("{column} from {}", source_label(source)));
        Ok(())
    }

    /// Keep the down-cast (or up-cast) half of the profile around the
    /// deepest valid sample, dropping everything else.
    pub fn reduce_up_down(&mut self, direction: CastDirection) {
        let Some(max_depth) = self.profile.max_valid_depth() else {
            return;
        };
        let mut reached = false;
        for i in 0..self.profile.len() {
            if self.profile.depth[i] == max_depth {
                reached = true;
            }
            let drop = match direction {
                CastDirection::Up => !reached,
                CastDirection::Down => reached,
            };
            if drop {
                self.profile.flag[i] = Flag::Reject;
            }
        }
        self.purge_flagged();
    }

    // ── raw copy & provenance ─────────────────────────────────────────────

    /// Freeze the current samples as the raw copy. Only the first call stores.
    pub fn store_raw(&mut self) {
        if self.raw.is_none() {
            info!("Profile: storing raw data ({} samples)", self.profile.len());
            self.raw = Some(self.profile.clone());
        }
    }

    /// Discard processing and rebuild from the raw copy.
    pub fn restart_processing(&mut self) -> Result<(), ProfileError> {
        let raw = self.raw.as_ref().ok_or(ProfileError::NoRawCopy)?;
        let first = self.profile.source_info.split('/').next().unwrap_or("").to_string();
        self.profile = raw.clone();
        self.profile.source_info = first;
        info!("Profile: restarted processing from raw copy");
        Ok(())
    }

    /// Replace the provenance token sharing `info`'s first 10 characters,
    /// or append `/info`.
    pub fn modify_source_info(&mut self, info: &str) {
        self.profile.source_info = merge_source_info(&self.profile.source_info, info);
    }
}

fn source_label(p: &Profile) -> String {
    p.source_info.split('/').next().unwrap_or("").to_string()
}

fn normalize_range((a, b): (f64, f64)) -> Result<(f64, f64), ProfileError> {
    if a.is_nan() || b.is_nan() {
        return Err(ProfileError::InvalidRange(a, b));
    }
    Ok(if a <= b { (a, b) } else { (b, a) })
}

pub(crate) fn merge_source_info(current: &str, info: &str) -> String {
    let key: String = info.chars().take(10).collect();
    let mut found = false;
    let tokens: Vec<&str> = current
        .split('/')
        .map(|t| {
            if t.contains(key.as_str()) {
                found = true;
                info
            } else {
                t
            }
        })
        .collect();
    let mut out = tokens.join("/");
    if !found {
        out.push('/');
        out.push_str(info);
    }
    out
}

// ── Douglas–Peucker ───────────────────────────────────────────────────────────

/// One-dimensional Douglas–Peucker over the speed axis.
///
/// Deviation is the speed residual between a sample and the chord joining the
/// segment endpoints at that sample's depth. Endpoints are always retained. A
/// zero-height chord (equal depths) measures the residual against the start
/// speed. Uses an explicit work stack.
pub fn douglas_peucker(depth: &[f64], speed: &[f64], tolerance: f64) -> Vec<bool> {
    let n = depth.len().min(speed.len());
    let mut retained = vec![false; n];
    if n == 0 {
        return retained;
    }
    retained[0] = true;
    retained[n - 1] = true;

    let mut stack = vec![(0usize, n - 1)];
    while let Some((start, end)) = stack.pop() {
        if end <= start + 1 {
            continue;
        }
        let span = depth[end] - depth[start];
        let slope = if span != 0.0 { (speed[end] - speed[start]) / span } else { 0.0 };

        let mut max_dist = 0.0;
        let mut max_ind = start;
        for i in start + 1..end {
            let dist = (speed[start] + slope * (depth[i] - depth[start]) - speed[i]).abs();
            if dist > max_dist {
                max_dist = dist;
                max_ind = i;
            }
        }

        if max_dist > tolerance {
            retained[max_ind] = true;
            stack.push((max_ind, end));
            stack.push((start, max_ind));
        }
    }
    retained
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cast(depth: &[f64], speed: &[f64]) -> ProfileEngine {
        ProfileEngine::new(Profile::from_depth_speed(depth, speed))
    }

    fn wiggly() -> ProfileEngine {
        let depth: Vec<f64> = (0..60).map(|i| i as f64 * 2.5).collect();
        let speed: Vec<f64> = depth
            .iter()
            .map(|d| 1500.0 - 0.05 * d + 2.0 * (d / 7.0).sin() + if *d > 80.0 { 3.0 } else { 0.0 })
            .collect();
        cast(&depth, &speed)
    }

    #[test]
    fn insert_interior_interpolates_missing_speed() {
        let mut e = cast(&[5.0, 10.0, 20.0], &[1500.0, 1502.0, 1505.0]);
        e.insert_sample(15.0, None, None, None, SampleSource::User, Flag::Keep).unwrap();
        assert_eq!(e.profile().depth, vec![5.0, 10.0, 15.0, 20.0]);
        assert_relative_eq!(e.profile().speed[2], 1503.5);
        assert_eq!(e.profile().source[2], SampleSource::User);
        assert!(e.profile().is_consistent());
    }

    #[test]
    fn insert_append_copies_previous_values() {
        let mut e = cast(&[5.0, 10.0, 20.0], &[1500.0, 1502.0, 1505.0]);
        e.insert_sample(30.0, None, Some(4.0), None, SampleSource::User, Flag::Keep).unwrap();
        let p = e.profile();
        assert_eq!(p.depth, vec![5.0, 10.0, 20.0, 30.0]);
        assert_relative_eq!(p.speed[3], 1505.0);
        assert_relative_eq!(p.temperature[3], 4.0);
        assert!(p.is_consistent());
    }

    #[test]
    fn insert_prepend_copies_next_values() {
        let mut e = cast(&[5.0, 10.0, 20.0], &[1500.0, 1502.0, 1505.0]);
        e.insert_sample(1.0, None, None, None, SampleSource::SurfaceSensor, Flag::Keep).unwrap();
        let p = e.profile();
        assert_eq!(p.depth, vec![1.0, 5.0, 10.0, 20.0]);
        assert_relative_eq!(p.speed[0], 1500.0);
        assert_eq!(p.source[0], SampleSource::SurfaceSensor);
    }

    #[test]
    fn insert_on_empty_profile_fails() {
        let mut e = ProfileEngine::new(Profile::new());
        let r = e.insert_sample(1.0, Some(1500.0), None, None, SampleSource::User, Flag::Keep);
        assert_eq!(r, Err(ProfileError::Empty));
    }

    #[test]
    fn insert_at_existing_depth_replaces_given_values() {
        let mut e = cast(&[5.0, 10.0, 20.0], &[1500.0, 1502.0, 1505.0]);
        e.insert_sample(10.0, Some(1499.0), None, Some(35.0), SampleSource::User, Flag::Keep).unwrap();
        let p = e.profile();
        assert_eq!(p.depth, vec![5.0, 10.0, 20.0]);
        assert_relative_eq!(p.speed[1], 1499.0);
        assert_relative_eq!(p.salinity[1], 35.0);
        assert_eq!(p.source[1], SampleSource::User);

        e.insert_sample(10.0, None, Some(8.0), None, SampleSource::User, Flag::Keep).unwrap();
        assert_relative_eq!(e.profile().speed[1], 1499.0);
        assert_relative_eq!(e.profile().temperature[1], 8.0);
    }

    #[test]
    fn insert_into_unordered_cast_keeps_depth_order() {
        let mut e = cast(&[0.0, 100.0, 50.0], &[1500.0, 1400.0, 1450.0]);
        e.insert_sample(60.0, None, None, None, SampleSource::User, Flag::Keep).unwrap();
        let p = e.profile();
        assert_eq!(p.depth, vec![0.0, 50.0, 60.0, 100.0]);
        assert_eq!(p.speed[..2], [1500.0, 1450.0]);
        assert_relative_eq!(p.speed[2], 1440.0);
        assert_relative_eq!(p.speed[3], 1400.0);
        assert!(p.is_consistent());
    }

    #[test]
    fn thin_sorts_unordered_cast_and_keeps_deepest_sample() {
        let mut e = cast(&[0.0, 100.0, 50.0], &[1500.0, 1400.0, 1450.0]);
        e.thin(0.1).unwrap();
        let p = e.profile();
        assert_eq!(p.max_depth(), Some(100.0));
        assert!(p.depth.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(p.depth.first(), Some(&0.0));
        assert_eq!(p.depth.last(), Some(&100.0));
        let at_100 = p.depth.iter().position(|d| *d == 100.0).unwrap();
        assert_relative_eq!(p.speed[at_100], 1400.0);
    }

    #[test]
    fn extend_is_noop_when_source_is_not_deeper() {
        let mut e = cast(&[0.0, 50.0, 100.0], &[1500.0, 1490.0, 1485.0]);
        let before = e.profile().clone();
        let shallow = Profile::from_depth_speed(&[10.0, 80.0, 100.0], &[1.0, 2.0, 3.0]);
        assert_eq!(e.extend(&shallow, SampleSource::Woa09Extend), 0);
        assert_eq!(e.profile(), &before);
        assert_eq!(e.extend(&Profile::new(), SampleSource::Woa09Extend), 0);
        assert_eq!(e.profile(), &before);
    }

    #[test]
    fn extend_appends_deeper_samples_with_tag() {
        let mut e = cast(&[0.0, 50.0, 100.0], &[1500.0, 1490.0, 1485.0]);
        e.toggle_flag((90.0, 110.0), (0.0, 2000.0), Column::Speed, FlagMode::Reject).unwrap();
        let deep = Profile::from_depth_speed(&[40.0, 75.0, 500.0], &[1.0, 2.0, 3.0]);
        // max valid depth is 50 with the 100 m sample rejected
        assert_eq!(e.extend(&deep, SampleSource::Woa09Extend), 2);
        let p = e.profile();
        assert_eq!(p.len(), 5);
        assert_eq!(p.depth[3..], [75.0, 500.0]);
        assert!(p.source[3..].iter().all(|s| *s == SampleSource::Woa09Extend));
    }

    #[test]
    fn toggle_flag_normalizes_range_order() {
        let mut e = cast(&[0.0, 10.0, 20.0, 30.0], &[1500.0, 1495.0, 1490.0, 1485.0]);
        let n = e
            .toggle_flag((25.0, 5.0), (1491.0, 1499.0), Column::Speed, FlagMode::Reject)
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(e.profile().flag[1], Flag::Reject);
        e.toggle_flag((0.0, 30.0), (2000.0, 0.0), Column::Speed, FlagMode::Restore).unwrap();
        assert!(e.profile().flag.iter().all(|f| *f == Flag::Keep));
        assert!(matches!(
            e.toggle_flag((f64::NAN, 1.0), (0.0, 1.0), Column::Depth, FlagMode::Reject),
            Err(ProfileError::InvalidRange(_, _))
        ));
    }

    #[test]
    fn thin_is_idempotent_and_keeps_endpoints() {
        for tol in [0.0, 0.1, 0.5, 2.0] {
            let mut e = wiggly();
            let first = e.profile().sample(0);
            let last = e.profile().sample(e.len() - 1);
            e.thin(tol).unwrap();
            let once = e.profile().clone();
            e.thin(tol).unwrap();
            assert_eq!(e.profile(), &once, "tolerance {tol}");
            assert_eq!(once.sample(0), first);
            assert_eq!(once.sample(once.len() - 1), last);
        }
    }

    #[test]
    fn thin_never_grows_and_zero_tolerance_drops_only_collinear() {
        let mut e = cast(&[0.0, 10.0, 20.0, 30.0, 40.0], &[1500.0, 1499.0, 1498.0, 1490.0, 1482.0]);
        let before = e.len();
        e.thin(0.0).unwrap();
        assert!(e.len() <= before);
        // 10 m and 30 m lie on their chords; 20 m is the knee
        assert_eq!(e.profile().depth, vec![0.0, 20.0, 40.0]);
    }

    #[test]
    fn thin_purges_rejected_first() {
        let mut e = cast(&[0.0, 10.0, 20.0], &[1500.0, 1600.0, 1500.0]);
        e.toggle_flag((5.0, 15.0), (0.0, 2000.0), Column::Speed, FlagMode::Reject).unwrap();
        e.thin(0.1).unwrap();
        assert_eq!(e.profile().depth, vec![0.0, 20.0]);
        assert!(e.profile().flag.iter().all(|f| *f == Flag::Keep));
    }

    #[test]
    fn thin_empty_or_bad_tolerance_fails() {
        assert_eq!(ProfileEngine::new(Profile::new()).thin(0.1), Err(ProfileError::Empty));
        assert!(matches!(wiggly().thin(-1.0), Err(ProfileError::InvalidRange(_, _))));
    }

    #[test]
    fn replace_column_interpolates_on_current_grid() {
        let mut e = cast(&[0.0, 5.0, 10.0], &[1500.0, 1500.0, 1500.0]);
        let mut src = Profile::from_depth_speed(&[0.0, 10.0], &[0.0, 0.0]);
        src.salinity = vec![30.0, 35.0];
        src.source_info = "WOA09".into();
        e.replace_column(&src, Column::Salinity).unwrap();
        assert_eq!(e.profile().salinity, vec![30.0, 32.5, 35.0]);
        assert!(e.profile().source_info.ends_with("salinity from WOA09"));
    }

    #[test]
    fn reduce_up_down_keeps_requested_half() {
        let depth = [1.0, 5.0, 10.0, 6.0, 2.0];
        let mut down = cast(&depth, &[1500.0; 5]);
        down.reduce_up_down(CastDirection::Down);
        assert_eq!(down.profile().depth, vec![1.0, 5.0]);

        let mut up = cast(&depth, &[1500.0; 5]);
        up.reduce_up_down(CastDirection::Up);
        assert_eq!(up.profile().depth, vec![10.0, 6.0, 2.0]);
    }

    #[test]
    fn restart_processing_restores_raw_and_trims_provenance() {
        let mut p = Profile::from_depth_speed(&[0.0, 10.0], &[1500.0, 1490.0]);
        p.source_info = "cast_001.asvp".into();
        let mut e = ProfileEngine::new(p);
        assert_eq!(e.restart_processing(), Err(ProfileError::NoRawCopy));
        e.store_raw();
        e.insert_sample(5.0, None, None, None, SampleSource::User, Flag::Keep).unwrap();
        e.modify_source_info("edited");
        e.store_raw();
        assert_eq!(e.raw().map(|r| r.len()), Some(2));
        e.restart_processing().unwrap();
        assert_eq!(e.len(), 2);
        assert_eq!(e.profile().source_info, "cast_001.asvp");
    }

    #[test]
    fn modify_source_info_replaces_matching_token() {
        assert_eq!(merge_source_info("cast", "ext. WOA09"), "cast/ext. WOA09");
        assert_eq!(
            merge_source_info("cast/surface ss 1500.1", "surface ss 1512.3"),
            "cast/surface ss 1512.3"
        );
    }

    #[test]
    fn overwrite_speed_above_only_touches_shallower() {
        let mut e = cast(&[0.0, 2.0, 4.0, 10.0], &[1500.0, 1500.0, 1500.0, 1490.0]);
        assert_eq!(e.overwrite_speed_above(4.0, 1510.0), 2);
        assert_eq!(e.profile().speed, vec![1510.0, 1510.0, 1500.0, 1490.0]);
    }
}
