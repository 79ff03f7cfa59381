//! Evaluation contexts.
//!
//! A [`Context`] carries ambient variables (the current frame, the current
//! scene path, ...) that affect computation without being graph edges. The
//! set of variables is closed: each has a [`Variable`] name and a typed
//! accessor. Nodes declare which variables each output reads, and only those
//! participate in the output's hash.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::hash::{Digest, DigestHasher};
use crate::value::Value;

/// Name of a context variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Variable {
    /// The current frame. Defaults to `1.0`.
    Frame,
    /// Frames per second. Defaults to `24.0`.
    FramesPerSecond,
    /// The scene location being evaluated, if any.
    ScenePath,
    /// An application-defined variable with a statically known name.
    Custom(&'static str),
}

impl Variable {
    /// Stable name used in hashes and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Variable::Frame => "frame",
            Variable::FramesPerSecond => "framesPerSecond",
            Variable::ScenePath => "scene:path",
            Variable::Custom(name) => *name,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const UNSET_TAG: u8 = 0;
const SET_TAG: u8 = 1;

/// Ambient evaluation variables.
///
/// Two contexts are equal when all their variables are equal, with floats
/// compared by bit pattern so equal contexts always hash identically. The full digest
/// is computed lazily and reset by every setter.
#[derive(Clone)]
pub struct Context {
    frame: f64,
    frames_per_second: f64,
    scene_path: Option<Arc<[String]>>,
    custom: BTreeMap<&'static str, Value>,
    digest: OnceLock<Digest>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        // Bitwise, as hashed.
        self.frame.to_bits() == other.frame.to_bits()
            && self.frames_per_second.to_bits() == other.frames_per_second.to_bits()
            && self.scene_path == other.scene_path
            && self.custom == other.custom
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("frame", &self.frame)
            .field("frames_per_second", &self.frames_per_second)
            .field("scene_path", &self.scene_path)
            .field("custom", &self.custom)
            .finish()
    }
}

impl Context {
    /// A context with default frame and frame rate, no scene path and no
    /// custom variables.
    pub fn new() -> Self {
        Self {
            frame: 1.0,
            frames_per_second: 24.0,
            scene_path: None,
            custom: BTreeMap::new(),
            digest: OnceLock::new(),
        }
    }

    /// The current frame.
    pub fn frame(&self) -> f64 {
        self.frame
    }

    /// Set the current frame.
    pub fn set_frame(&mut self, frame: f64) {
        self.frame = frame;
        self.digest = OnceLock::new();
    }

    /// Builder-style [`Context::set_frame`].
    pub fn with_frame(mut self, frame: f64) -> Self {
        self.set_frame(frame);
        self
    }

    /// Frames per second.
    pub fn frames_per_second(&self) -> f64 {
        self.frames_per_second
    }

    /// Set frames per second.
    pub fn set_frames_per_second(&mut self, fps: f64) {
        self.frames_per_second = fps;
        self.digest = OnceLock::new();
    }

    /// Current time in seconds, derived from frame and frame rate.
    pub fn time(&self) -> f64 {
        self.frame / self.frames_per_second
    }

    /// The scene path being evaluated.
    pub fn scene_path(&self) -> Option<&[String]> {
        self.scene_path.as_deref()
    }

    /// Set or clear the scene path.
    pub fn set_scene_path(&mut self, path: Option<Vec<String>>) {
        self.scene_path = path.map(Arc::from);
        self.digest = OnceLock::new();
    }

    /// Builder-style [`Context::set_scene_path`] taking a `/a/b` style path.
    pub fn with_scene_path(mut self, path: &str) -> Self {
        let names = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        self.set_scene_path(Some(names));
        self
    }

    /// Value of a custom variable.
    pub fn custom(&self, name: &'static str) -> Option<&Value> {
        self.custom.get(name)
    }

    /// Set a custom variable.
    pub fn set_custom(&mut self, name: &'static str, value: impl Into<Value>) {
        self.custom.insert(name, value.into());
        self.digest = OnceLock::new();
    }

    /// Remove a custom variable.
    pub fn remove_custom(&mut self, name: &'static str) -> Option<Value> {
        let removed = self.custom.remove(name);
        if removed.is_some() {
            self.digest = OnceLock::new();
        }
        removed
    }

    /// Variables that currently have a value, in a stable order.
    pub fn variables(&self) -> Vec<Variable> {
        let mut variables = vec![Variable::Frame, Variable::FramesPerSecond];
        if self.scene_path.is_some() {
            variables.push(Variable::ScenePath);
        }
        variables.extend(self.custom.keys().map(|name| Variable::Custom(*name)));
        variables
    }

    /// Whether a variable currently has a value.
    pub fn contains(&self, variable: Variable) -> bool {
        match variable {
            Variable::Frame | Variable::FramesPerSecond => true,
            Variable::ScenePath => self.scene_path.is_some(),
            Variable::Custom(name) => self.custom.contains_key(name),
        }
    }

    /// Append one variable (name and value, or an unset marker) to a hasher.
    ///
    /// Reading a variable the context does not hold is not an error; it
    /// simply hashes as unset.
    pub fn hash_variable(&self, variable: Variable, hasher: &mut DigestHasher) {
        let tag = match variable {
            Variable::Frame => 1,
            Variable::FramesPerSecond => 2,
            Variable::ScenePath => 3,
            Variable::Custom(_) => 4,
        };
        hasher.append_tag(tag).append_str(variable.name());
        match variable {
            Variable::Frame => {
                hasher.append_tag(SET_TAG).append_f64(self.frame);
            }
            Variable::FramesPerSecond => {
                hasher.append_tag(SET_TAG).append_f64(self.frames_per_second);
            }
            Variable::ScenePath => match &self.scene_path {
                Some(path) => {
                    hasher.append_tag(SET_TAG).append_u64(path.len() as u64);
                    for name in path.iter() {
                        hasher.append_str(name);
                    }
                }
                None => {
                    hasher.append_tag(UNSET_TAG);
                }
            },
            Variable::Custom(name) => match self.custom.get(name) {
                Some(value) => {
                    hasher.append_tag(SET_TAG);
                    value.hash_into(hasher);
                }
                None => {
                    hasher.append_tag(UNSET_TAG);
                }
            },
        }
    }

    /// Digest of a single variable.
    pub fn variable_hash(&self, variable: Variable) -> Digest {
        let mut hasher = DigestHasher::new();
        self.hash_variable(variable, &mut hasher);
        hasher.finish()
    }

    /// Digest of the whole context. Equal contexts have equal digests.
    pub fn hash(&self) -> Digest {
        *self.digest.get_or_init(|| {
            let mut hasher = DigestHasher::new();
            for variable in [Variable::Frame, Variable::FramesPerSecond, Variable::ScenePath] {
                self.hash_variable(variable, &mut hasher);
            }
            for name in self.custom.keys() {
                self.hash_variable(Variable::Custom(*name), &mut hasher);
            }
            hasher.finish()
        })
    }
}
