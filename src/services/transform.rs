//! Coordinate frame transforms
//!
//! The processor only sees the `TransformService` trait. The built-in
//! implementation is a static graph of planar rigid transforms loaded from
//! config, which covers fixed sensor mounts on a map.

use crate::domain::types::Position;
use crate::infra::config::FrameTransformConfig;
use crate::infra::error::TransformError;
use async_trait::async_trait;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

/// Resolves a position from one frame into another at the latest common time
#[async_trait]
pub trait TransformService: Send + Sync {
    async fn transform_position(
        &self,
        source_frame: &str,
        target_frame: &str,
        position: Position,
    ) -> Result<Position, TransformError>;
}

/// Frame names are compared without a leading '/'
#[inline]
pub fn canonical_frame(frame: &str) -> &str {
    frame.strip_prefix('/').unwrap_or(frame)
}

/// Planar rigid transform: rotate by `yaw`, then translate by (x, y)
#[derive(Debug, Clone, Copy, PartialEq)]
struct Rigid2 {
    x: f64,
    y: f64,
    yaw: f64,
}

impl Rigid2 {
    fn apply(&self, p: Position) -> Position {
        let (sin, cos) = self.yaw.sin_cos();
        Position::new(cos * p.x - sin * p.y + self.x, sin * p.x + cos * p.y + self.y, p.z)
    }

    fn apply_inverse(&self, p: Position) -> Position {
        let (sin, cos) = self.yaw.sin_cos();
        let dx = p.x - self.x;
        let dy = p.y - self.y;
        Position::new(cos * dx + sin * dy, -sin * dx + cos * dy, p.z)
    }
}

/// Edge traversal: `forward` maps child coordinates into the parent frame
#[derive(Debug, Clone, Copy)]
struct Hop {
    transform: Rigid2,
    forward: bool,
}

/// Undirected graph of static frame transforms
#[derive(Debug, Default)]
pub struct StaticFrameGraph {
    edges: FxHashMap<String, Vec<(String, Hop)>>,
}

impl StaticFrameGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(transforms: &[FrameTransformConfig]) -> Self {
        let mut graph = Self::new();
        for t in transforms {
            graph.insert(&t.parent, &t.child, t.x, t.y, t.yaw);
        }
        graph
    }

    /// Register the pose of `child` in `parent`
    pub fn insert(&mut self, parent: &str, child: &str, x: f64, y: f64, yaw: f64) {
        let parent = canonical_frame(parent).to_string();
        let child = canonical_frame(child).to_string();
        let transform = Rigid2 { x, y, yaw };

        self.edges
            .entry(child.clone())
            .or_default()
            .push((parent.clone(), Hop { transform, forward: true }));
        self.edges.entry(parent).or_default().push((child, Hop { transform, forward: false }));
    }

    pub fn contains(&self, frame: &str) -> bool {
        self.edges.contains_key(canonical_frame(frame))
    }

    /// Breadth-first search for the hop sequence from `source` to `target`
    fn path(&self, source: &str, target: &str) -> Result<Vec<Hop>, TransformError> {
        if !self.edges.contains_key(source) {
            return Err(TransformError::UnknownFrame(source.to_string()));
        }
        if !self.edges.contains_key(target) {
            return Err(TransformError::UnknownFrame(target.to_string()));
        }

        let mut came_from: FxHashMap<&str, (&str, Hop)> = FxHashMap::default();
        let mut visited: FxHashSet<&str> = FxHashSet::default();
        let mut frontier = VecDeque::from([source]);
        visited.insert(source);

        while let Some(frame) = frontier.pop_front() {
            if frame == target {
                let mut hops = Vec::new();
                let mut cursor = target;
                while let Some(&(prev, hop)) = came_from.get(cursor) {
                    hops.push(hop);
                    cursor = prev;
                }
                hops.reverse();
                return Ok(hops);
            }
            for (next, hop) in self.edges.get(frame).into_iter().flatten() {
                if visited.insert(next.as_str()) {
                    came_from.insert(next.as_str(), (frame, *hop));
                    frontier.push_back(next.as_str());
                }
            }
        }

        Err(TransformError::Disconnected {
            source_frame: source.to_string(),
            target_frame: target.to_string(),
        })
    }

    pub fn resolve(
        &self,
        source_frame: &str,
        target_frame: &str,
        position: Position,
    ) -> Result<Position, TransformError> {
        let source = canonical_frame(source_frame);
        let target = canonical_frame(target_frame);
        if source == target {
            return Ok(position);
        }

        let hops = self.path(source, target)?;
        Ok(hops.iter().fold(position, |p, hop| {
            if hop.forward {
                hop.transform.apply(p)
            } else {
                hop.transform.apply_inverse(p)
            }
        }))
    }
}

#[async_trait]
impl TransformService for StaticFrameGraph {
    async fn transform_position(
        &self,
        source_frame: &str,
        target_frame: &str,
        position: Position,
    ) -> Result<Position, TransformError> {
        self.resolve(source_frame, target_frame, position)
    }
}
