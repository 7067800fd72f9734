//! Animation Engine
//!
//! Walks one animation's frame graph. The engine only decides *which*
//! frame comes next; sleeping for a frame's duration is left to the caller
//! so the same walk can drive real-time playback and full-speed encoding.
//!
//! # Termination
//!
//! A walk ends when the successor index is at or past the end of the
//! animation. There is no explicit end marker.
//!
//! # Randomness
//!
//! Weighted branches consume one draw in `[0, 1)` from a [`DrawSource`].
//! Production code wraps an RNG in [`RngDraws`]; tests feed a fixed
//! sequence.

use rand::Rng;
use thiserror::Error;

use crate::agent::{AgentDefinition, Frame, Transition, WeightedBranch};

/// Errors raised by the engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The agent has no animation with this name
    #[error("Unknown animation: {0}")]
    UnknownAnimation(String),
}

/// Source of uniform draws in `[0, 1)`
pub trait DrawSource {
    /// Produce the next draw
    fn draw(&mut self) -> f64;
}

/// [`DrawSource`] backed by any `rand` RNG
#[derive(Debug, Clone)]
pub struct RngDraws<R>(pub R);

impl<R: Rng> DrawSource for RngDraws<R> {
    fn draw(&mut self) -> f64 {
        self.0.gen::<f64>()
    }
}

/// Pick a branch target for draw `r`, or `default` when no branch covers it
///
/// Branch weights are percentages and need not sum to 100.
#[must_use]
pub fn weighted_choice(branches: &[WeightedBranch], r: f64, default: usize) -> usize {
    let mut acc = 0.0;
    for branch in branches {
        let weight = f64::from(branch.weight_percent) / 100.0;
        if r < acc + weight {
            return branch.target;
        }
        acc += weight;
    }
    default
}

/// Resolve the successor of frame `current`
///
/// Only `WeightedBranch` consumes a draw.
pub fn step<D: DrawSource + ?Sized>(frames: &[Frame], current: usize, draws: &mut D) -> usize {
    let Some(frame) = frames.get(current) else {
        return current.saturating_add(1);
    };
    match &frame.transition {
        Transition::Linear => current + 1,
        Transition::ExitBranch { target } => *target,
        Transition::WeightedBranch { branches } => {
            weighted_choice(branches, draws.draw(), current + 1)
        }
    }
}

/// Frame-graph walker over one agent
pub struct AnimationEngine<'a, D> {
    definition: &'a AgentDefinition,
    draws: D,
}

impl<'a, D: DrawSource> AnimationEngine<'a, D> {
    /// Create an engine over `definition` drawing randomness from `draws`
    pub fn new(definition: &'a AgentDefinition, draws: D) -> Self {
        Self { definition, draws }
    }

    /// The agent being animated
    #[must_use]
    pub fn definition(&self) -> &'a AgentDefinition {
        self.definition
    }

    /// Start a walk of `name` from frame 0
    ///
    /// Each call restarts from the beginning.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnknownAnimation` if the agent lacks `name`.
    pub fn play(&mut self, name: &str) -> Result<Playback<'a, '_, D>, EngineError> {
        let frames = self
            .definition
            .animation(name)
            .ok_or_else(|| EngineError::UnknownAnimation(name.to_string()))?;
        Ok(Playback {
            frames,
            next: Some(0),
            draws: &mut self.draws,
        })
    }

    /// Successor of frame `current` in animation `name`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnknownAnimation` if the agent lacks `name`.
    pub fn step(&mut self, name: &str, current: usize) -> Result<usize, EngineError> {
        let frames = self
            .definition
            .animation(name)
            .ok_or_else(|| EngineError::UnknownAnimation(name.to_string()))?;
        Ok(step(frames, current, &mut self.draws))
    }
}

/// Lazy walk over one animation, yielding `(index, frame)`
pub struct Playback<'a, 'e, D> {
    frames: &'a [Frame],
    next: Option<usize>,
    draws: &'e mut D,
}

impl<'a, D: DrawSource> Iterator for Playback<'a, '_, D> {
    type Item = (usize, &'a Frame);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next.take()?;
        let frame = self.frames.get(index)?;
        let successor = step(self.frames, index, &mut *self.draws);
        if successor < self.frames.len() {
            self.next = Some(successor);
        }
        Some((index, frame))
    }
}
