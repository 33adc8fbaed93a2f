//! Qualitative Trajectory Calculus classifier
//!
//! Each step between two consecutive history entries yields one state.
//! Symbols are -1 / 0 / +1:
//! - distance symbol: -1 moving towards the other agent, +1 moving away
//! - side symbol (QTC_C only): -1 moving to the left of the line joining
//!   the agents, +1 to the right
//!
//! A state is `[k, l]` for QTC_B and `[k, l, k_side, l_side]` for QTC_C.
//! The distance-switched variants emit QTC_C states while the agents are
//! within the threshold and QTC_B states beyond it.

use crate::domain::qtc::{DistanceThreshold, QtcParameters, QtcType, DISTANCE_BANDS};
use crate::domain::types::Point2;
use crate::infra::error::ClassifierError;
use serde::Serialize;
use smallvec::SmallVec;

/// One qualitative state, two or four symbols
pub type QtcState = SmallVec<[i8; 4]>;

/// Numeric evidence attached to one state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Evidence {
    /// Inter-agent distance at the end of the step (meters)
    Distance(f64),
    /// Probability of each abstract distance band, nearest band first
    Bands(Vec<(String, f64)>),
}

/// Output of one classifier call; `states` and `evidence` have equal length
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Classification {
    pub states: Vec<QtcState>,
    pub evidence: Vec<Evidence>,
}

impl Classification {
    /// The transition ending at the most recent history entry
    pub fn last(&self) -> Option<(&QtcState, &Evidence)> {
        self.states.last().zip(self.evidence.last())
    }
}

/// Maps a pair of position histories to a symbolic state sequence
pub trait Classifier: Send + Sync {
    fn classify(
        &self,
        agent_a: &[Point2],
        agent_b: &[Point2],
        params: &QtcParameters,
    ) -> Result<Classification, ClassifierError>;
}

/// Built-in QTC implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct QtcClassifier;

impl Classifier for QtcClassifier {
    fn classify(
        &self,
        agent_a: &[Point2],
        agent_b: &[Point2],
        params: &QtcParameters,
    ) -> Result<Classification, ClassifierError> {
        if agent_a.len() != agent_b.len() {
            return Err(ClassifierError::MismatchedLengths { a: agent_a.len(), b: agent_b.len() });
        }
        if agent_a.len() < 2 {
            return Err(ClassifierError::InsufficientHistory(agent_a.len()));
        }

        let q = params.quantisation_factor;
        let mut out = Classification::default();

        for (a, b) in agent_a.windows(2).zip(agent_b.windows(2)) {
            let (k0, k1, l0, l1) = (a[0], a[1], b[0], b[1]);
            let distance = k1.distance(&l1);

            let (use_c, evidence) = match (params.qtc_type, params.threshold()) {
                (QtcType::Qtcb, _) => (false, Evidence::Distance(distance)),
                (QtcType::Qtcc, _) => (true, Evidence::Distance(distance)),
                (_, DistanceThreshold::Abstract(band)) => {
                    let probs = band_probabilities(distance);
                    (argmax(&probs) <= band, Evidence::Bands(probs))
                }
                (_, DistanceThreshold::Numeric(threshold)) => {
                    (distance <= threshold, Evidence::Distance(distance))
                }
            };

            let mut state: QtcState =
                SmallVec::from_slice(&[towards(k0, k1, l0, q), towards(l0, l1, k0, q)]);
            if use_c {
                state.push(side(k0, k1, l0, q));
                state.push(side(l0, l1, k0, q));
            }

            out.states.push(state);
            out.evidence.push(evidence);
        }

        if params.validate {
            out = validate(out, params.qtc_type);
        }
        if !params.no_collapse {
            out = collapse(out);
        }
        Ok(out)
    }
}

/// Relative movement of `own` with respect to where `other` was at step start
fn towards(own_t0: Point2, own_t1: Point2, other_t0: Point2, q: f64) -> i8 {
    let delta = own_t1.distance(&other_t0) - own_t0.distance(&other_t0);
    quantise(delta, q)
}

/// Side of the line from `own` to `other` that `own` moves to
fn side(own_t0: Point2, own_t1: Point2, other_t0: Point2, q: f64) -> i8 {
    let (dx, dy) = (other_t0.x - own_t0.x, other_t0.y - own_t0.y);
    let len = dx.hypot(dy);
    if len == 0.0 {
        return 0;
    }
    // Signed perpendicular offset, positive to the left
    let offset = (dx * (own_t1.y - own_t0.y) - dy * (own_t1.x - own_t0.x)) / len;
    -quantise(offset, q)
}

#[inline]
fn quantise(value: f64, q: f64) -> i8 {
    if value.abs() <= q {
        0
    } else if value < 0.0 {
        -1
    } else {
        1
    }
}

/// Normalised Gaussian likelihood of `distance` for every band
fn band_probabilities(distance: f64) -> Vec<(String, f64)> {
    let densities: Vec<f64> = DISTANCE_BANDS
        .iter()
        .map(|b| {
            let z = (distance - b.midpoint) / b.spread;
            (-0.5 * z * z).exp() / (b.spread * (2.0 * std::f64::consts::PI).sqrt())
        })
        .collect();
    let total: f64 = densities.iter().sum();

    let probs: Vec<f64> = if total > 0.0 && total.is_finite() {
        densities.iter().map(|d| d / total).collect()
    } else {
        // Far outside every band: all mass on the nearest midpoint
        let nearest = DISTANCE_BANDS
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (distance - a.midpoint).abs().total_cmp(&(distance - b.midpoint).abs())
            })
            .map(|(i, _)| i)
            .unwrap_or(DISTANCE_BANDS.len() - 1);
        (0..DISTANCE_BANDS.len()).map(|i| if i == nearest { 1.0 } else { 0.0 }).collect()
    };

    DISTANCE_BANDS.iter().zip(probs).map(|(b, p)| (b.name.to_string(), p)).collect()
}

fn argmax(probs: &[(String, f64)]) -> usize {
    probs
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Insert neutral states where a symbol jumps straight between -1 and +1.
///
/// Only symbols both states share are compared. The simplified switched
/// model does not validate across a QTC_B/QTC_C boundary.
fn validate(input: Classification, qtc_type: QtcType) -> Classification {
    let mut out = Classification::default();
    let mut iter = input.states.into_iter().zip(input.evidence);

    let Some((first, first_ev)) = iter.next() else {
        return out;
    };
    out.states.push(first);
    out.evidence.push(first_ev);

    for (state, evidence) in iter {
        let prev = &out.states[out.states.len() - 1];
        let crosses_boundary = prev.len() != state.len();
        if !(crosses_boundary && qtc_type == QtcType::Qtcbcs) {
            let shared = prev.len().min(state.len());
            let jumps = (0..shared).any(|i| prev[i] * state[i] == -1);
            if jumps {
                let mut neutral = state.clone();
                for i in 0..shared {
                    if prev[i] * state[i] == -1 {
                        neutral[i] = 0;
                    }
                }
                out.states.push(neutral);
                out.evidence.push(evidence.clone());
            }
        }
        out.states.push(state);
        out.evidence.push(evidence);
    }
    out
}

/// Merge runs of identical consecutive states, keeping the latest evidence
fn collapse(input: Classification) -> Classification {
    let mut out = Classification::default();
    for (state, evidence) in input.states.into_iter().zip(input.evidence) {
        if out.states.last() == Some(&state) {
            let last = out.evidence.len() - 1;
            out.evidence[last] = evidence;
        } else {
            out.states.push(state);
            out.evidence.push(evidence);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn pts(v: &[(f64, f64)]) -> Vec<Point2> {
        v.iter().map(|&(x, y)| Point2::new(x, y)).collect()
    }

    fn params(qtc_type: QtcType) -> QtcParameters {
        QtcParameters {
            qtc_type,
            quantisation_factor: 0.01,
            distance_threshold: 1.22,
            abstract_distance_threshold: 2,
            validate: false,
            no_collapse: true,
        }
    }

    fn classify(
        a: &[(f64, f64)],
        b: &[(f64, f64)],
        p: &QtcParameters,
    ) -> Result<Classification, ClassifierError> {
        QtcClassifier.classify(&pts(a), &pts(b), p)
    }

    #[test]
    fn test_qtcb_entity_moving_away() {
        let c = classify(&[(0.0, 0.0), (0.0, 0.0)], &[(1.0, 0.0), (2.0, 0.0)], &params(QtcType::Qtcb))
            .unwrap();
        assert_eq!(c.states, vec![QtcState::from_slice(&[0, 1])]);
        assert_eq!(c.evidence, vec![Evidence::Distance(2.0)]);
    }

    #[test]
    fn test_qtcb_both_approaching() {
        let c = classify(&[(0.0, 0.0), (1.0, 0.0)], &[(4.0, 0.0), (3.0, 0.0)], &params(QtcType::Qtcb))
            .unwrap();
        assert_eq!(c.states[0].as_slice(), &[-1, -1]);
    }

    #[test]
    fn test_quantisation_suppresses_small_motion() {
        let mut p = params(QtcType::Qtcb);
        p.quantisation_factor = 0.5;
        let c = classify(&[(0.0, 0.0), (0.0, 0.0)], &[(1.0, 0.0), (1.25, 0.0)], &p).unwrap();
        assert_eq!(c.states[0].as_slice(), &[0, 0]);
    }

    #[test]
    fn test_qtcc_side_symbols() {
        // Robot at origin facing the human at (2, 0); human steps to +y,
        // which is the human's right when looking back at the robot
        let c = classify(&[(0.0, 0.0), (0.0, 0.0)], &[(2.0, 0.0), (2.0, 1.0)], &params(QtcType::Qtcc))
            .unwrap();
        assert_eq!(c.states[0].as_slice(), &[0, 1, 0, 1]);

        // Robot steps to +y: left of the line towards the human
        let c = classify(&[(0.0, 0.0), (0.0, 1.0)], &[(2.0, 0.0), (2.0, 0.0)], &params(QtcType::Qtcc))
            .unwrap();
        assert_eq!(c.states[0].as_slice(), &[1, 0, -1, 0]);
    }

    #[test]
    fn test_distance_switching() {
        let p = params(QtcType::Qtcbcs);
        let near = classify(&[(0.0, 0.0), (0.0, 0.0)], &[(0.5, 0.0), (1.0, 0.0)], &p).unwrap();
        assert_eq!(near.states[0].len(), 4);

        let far = classify(&[(0.0, 0.0), (0.0, 0.0)], &[(1.0, 0.0), (2.0, 0.0)], &p).unwrap();
        assert_eq!(far.states[0].as_slice(), &[0, 1]);
    }

    #[test]
    fn test_argprobd_band_evidence() {
        let p = params(QtcType::QtcbcsArgprobd);
        let c = classify(&[(0.0, 0.0), (0.0, 0.0)], &[(2.0, 0.0), (2.46, 0.0)], &p).unwrap();

        let Evidence::Bands(ref bands) = c.evidence[0] else {
            panic!("expected band evidence");
        };
        assert_eq!(bands.len(), DISTANCE_BANDS.len());
        assert_eq!(bands[2].0, "soc");
        assert_eq!(argmax(bands), 2);
        let total: f64 = bands.iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-9);
        // "soc" is within the threshold band, so side symbols are present
        assert_eq!(c.states[0].len(), 4);
    }

    #[test]
    fn test_band_probabilities_far_away() {
        let bands = band_probabilities(1000.0);
        assert_eq!(bands[4].1, 1.0);
    }

    #[test]
    fn test_validate_inserts_neutral_state() {
        let input = Classification {
            states: vec![smallvec![-1, 0], smallvec![1, 0]],
            evidence: vec![Evidence::Distance(1.0), Evidence::Distance(2.0)],
        };
        let out = validate(input, QtcType::Qtcb);
        let states: Vec<&[i8]> = out.states.iter().map(|s| s.as_slice()).collect();
        assert_eq!(states, vec![&[-1, 0][..], &[0, 0][..], &[1, 0][..]]);
        assert_eq!(out.evidence.len(), 3);
    }

    #[test]
    fn test_collapse_merges_repeats() {
        let input = Classification {
            states: vec![smallvec![0, 1], smallvec![0, 1], smallvec![-1, 1]],
            evidence: vec![
                Evidence::Distance(1.0),
                Evidence::Distance(2.0),
                Evidence::Distance(3.0),
            ],
        };
        let out = collapse(input);
        assert_eq!(out.states.len(), 2);
        assert_eq!(out.evidence, vec![Evidence::Distance(2.0), Evidence::Distance(3.0)]);
    }

    #[test]
    fn test_last_transition() {
        let mut p = params(QtcType::Qtcb);
        p.no_collapse = false;
        let c = classify(
            &[(0.0, 0.0), (0.0, 0.0), (0.0, 0.0)],
            &[(1.0, 0.0), (2.0, 0.0), (1.0, 0.0)],
            &p,
        )
        .unwrap();
        let (state, evidence) = c.last().unwrap();
        assert_eq!(state.as_slice(), &[0, -1]);
        assert_eq!(*evidence, Evidence::Distance(1.0));
    }

    #[test]
    fn test_errors() {
        let p = params(QtcType::Qtcb);
        assert_eq!(
            classify(&[(0.0, 0.0)], &[(1.0, 0.0)], &p),
            Err(ClassifierError::InsufficientHistory(1))
        );
        assert_eq!(
            classify(&[(0.0, 0.0), (0.0, 0.0)], &[(1.0, 0.0)], &p),
            Err(ClassifierError::MismatchedLengths { a: 2, b: 1 })
        );
    }

    #[test]
    fn test_evidence_serialisation() {
        let json = serde_json::to_string(&vec![Evidence::Distance(1.5)]).unwrap();
        assert_eq!(json, "[1.5]");
        let json =
            serde_json::to_string(&Evidence::Bands(vec![("int".to_string(), 0.25)])).unwrap();
        assert_eq!(json, r#"[["int",0.25]]"#);
    }
}
