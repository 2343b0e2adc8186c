//! Build graph states and their serialized definition.
//!
//! A [`State`] is an immutable handle onto the last operation of a chain,
//! plus the environment, working directory, user and platform that the next
//! operation inherits. Every builder method returns a new state, so earlier
//! states stay valid and can be shared between targets.
//!
//! [`State::marshal`] flattens the graph behind a state into a
//! [`Definition`]: operations in dependency order, each addressed by a
//! content digest chained over its inputs.

use super::options::Platform;
use crate::error::{BlubberError, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// File ownership applied to copied files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum FileAction {
    /// Copies `src` out of input `input` onto the first input
    Copy {
        input: usize,
        src: String,
        dest: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        owner: Option<Owner>,
        follow_symlinks: bool,
        copy_dir_contents_only: bool,
        create_dest_path: bool,
        allow_wildcard: bool,
        allow_empty_wildcard: bool,
    },
    Mkdir {
        path: String,
        mode: u32,
        make_parents: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        owner: Option<Owner>,
    },
}

impl FileAction {
    /// A copy with the semantics of a Dockerfile `COPY`.
    pub fn copy(input: usize, src: &str, dest: &str, owner: Option<Owner>) -> Self {
        Self::Copy {
            input,
            src: src.to_string(),
            dest: dest.to_string(),
            owner,
            follow_symlinks: true,
            copy_dir_contents_only: true,
            create_dest_path: true,
            allow_wildcard: true,
            allow_empty_wildcard: true,
        }
    }

    pub fn mkdir(path: &str, owner: Option<Owner>) -> Self {
        Self::Mkdir { path: path.to_string(), mode: 0o755, make_parents: true, owner }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Op {
    /// An image or the build context
    Source {
        identifier: String,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        attrs: BTreeMap<String, String>,
    },
    /// A process run on top of the first input
    Exec {
        args: Vec<String>,
        env: Vec<String>,
        cwd: String,
        user: String,
        ignore_cache: bool,
    },
    /// File actions applied on top of the first input
    File { actions: Vec<FileAction> },
}

#[derive(Debug)]
struct Node {
    op: Op,
    inputs: Vec<Arc<Node>>,
    description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    output: Option<Arc<Node>>,
    env: Vec<(String, String)>,
    dir: String,
    user: String,
    platform: Option<Platform>,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.op == other.op && self.inputs == other.inputs
    }
}

impl Eq for Node {}

impl Default for State {
    fn default() -> Self {
        Self::scratch()
    }
}

impl State {
    /// An empty filesystem.
    pub fn scratch() -> Self {
        Self { output: None, env: Vec::new(), dir: "/".into(), user: String::new(), platform: None }
    }

    /// The root filesystem of an image, addressed by a normalized reference.
    pub fn image(reference: &str, digest: Option<&str>, platform: Option<&Platform>) -> Self {
        let identifier = match digest {
            Some(digest) if !reference.contains('@') => {
                format!("docker-image://{}@{}", reference, digest)
            }
            _ => format!("docker-image://{}", reference),
        };

        Self::source(identifier, platform)
    }

    /// Files from the client side, such as the build context.
    pub fn local(name: &str) -> Self {
        Self::source(format!("local://{}", name), None)
    }

    fn source(identifier: String, platform: Option<&Platform>) -> Self {
        let mut attrs = BTreeMap::new();

        if let Some(platform) = platform {
            attrs.insert("platform".to_string(), platform.to_string());
        }

        let op = Op::Source { identifier, attrs };

        Self {
            output: Some(Arc::new(Node { op, inputs: Vec::new(), description: None })),
            platform: platform.cloned(),
            ..Self::scratch()
        }
    }

    pub fn is_scratch(&self) -> bool {
        self.output.is_none()
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn get_env(&self, key: &str) -> Option<&str> {
        self.env.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Sets `key`, keeping its position if already present.
    pub fn add_env(&self, key: &str, value: &str) -> Self {
        let mut next = self.clone();

        match next.env.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => next.env.push((key.to_string(), value.to_string())),
        }

        next
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    /// Changes directory, relative to the current one.
    pub fn with_dir(&self, dir: &str) -> Self {
        Self { dir: crate::paths::resolve(&self.dir, dir), ..self.clone() }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn with_user(&self, user: &str) -> Self {
        Self { user: user.to_string(), ..self.clone() }
    }

    pub fn platform(&self) -> Option<&Platform> {
        self.platform.as_ref()
    }

    pub fn with_platform(&self, platform: Platform) -> Self {
        Self { platform: Some(platform), ..self.clone() }
    }

    /// Runs `args` with this state's environment, directory and user.
    pub fn run(&self, args: Vec<String>, ignore_cache: bool) -> Self {
        let op = Op::Exec {
            args,
            env: self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect(),
            cwd: self.dir.clone(),
            user: self.user.clone(),
            ignore_cache,
        };

        self.chain(op, None)
    }

    /// Input index that `source` will have in a file operation on this
    /// state. The state itself comes first unless it is scratch.
    pub fn source_input(&self) -> usize {
        usize::from(self.output.is_some())
    }

    /// Copies files out of `source` onto this state. Copy actions should
    /// take their input from [`State::source_input`].
    ///
    /// A scratch `source` has nothing to copy, and the state is returned
    /// unchanged.
    pub fn copy(&self, source: &State, actions: Vec<FileAction>) -> Self {
        if source.is_scratch() {
            return self.clone();
        }

        self.chain(Op::File { actions }, source.output.clone())
    }

    /// Applies file actions that need no other input.
    pub fn file(&self, actions: Vec<FileAction>) -> Self {
        self.chain(Op::File { actions }, None)
    }

    /// Attaches a human readable description to the last operation.
    pub fn described(&self, description: impl Into<String>) -> Self {
        let Some(head) = &self.output else {
            return self.clone();
        };

        let node = Node {
            op: head.op.clone(),
            inputs: head.inputs.clone(),
            description: Some(description.into()),
        };

        Self { output: Some(Arc::new(node)), ..self.clone() }
    }

    fn chain(&self, op: Op, extra: Option<Arc<Node>>) -> Self {
        let inputs = self.output.iter().cloned().chain(extra).collect();
        let node = Node { op, inputs, description: None };

        Self { output: Some(Arc::new(node)), ..self.clone() }
    }

    /// Serializes the graph behind this state.
    pub fn marshal(&self) -> Definition {
        let mut marshaler = Marshaler::default();
        let head = self.output.as_ref().map(|node| marshaler.visit(node));

        Definition { ops: marshaler.ops, head }
    }
}

#[derive(Default)]
struct Marshaler {
    digests: HashMap<*const Node, String>,
    seen: HashSet<String>,
    ops: Vec<OpEntry>,
}

impl Marshaler {
    /// Post-order walk: inputs are always emitted before their dependents.
    fn visit(&mut self, node: &Arc<Node>) -> String {
        if let Some(digest) = self.digests.get(&Arc::as_ptr(node)) {
            return digest.clone();
        }

        let inputs: Vec<String> = node.inputs.iter().map(|input| self.visit(input)).collect();
        let digest = compute_digest(&node.op, &inputs);

        if self.seen.insert(digest.clone()) {
            self.ops.push(OpEntry {
                digest: digest.clone(),
                inputs,
                op: node.op.clone(),
                description: node.description.clone(),
            });
        }

        self.digests.insert(Arc::as_ptr(node), digest.clone());
        digest
    }
}

fn compute_digest(op: &Op, inputs: &[String]) -> String {
    let mut hasher = Sha256::new();

    for input in inputs {
        hasher.update(input.as_bytes());
    }

    // descriptions are not part of the digest
    // serialization cannot fail: all map keys are strings
    let repr = serde_json::to_vec(op).unwrap_or_default();
    hasher.update(&repr);

    format!("sha256:{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpEntry {
    pub digest: String,
    pub inputs: Vec<String>,
    pub op: Op,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A flattened build graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Definition {
    /// Operations, each after all of its inputs
    pub ops: Vec<OpEntry>,
    /// Digest of the final operation; `None` for an empty filesystem
    pub head: Option<String>,
}

impl Definition {
    pub fn get(&self, digest: &str) -> Option<&OpEntry> {
        self.ops.iter().find(|entry| entry.digest == digest)
    }

    pub fn head_op(&self) -> Option<&Op> {
        self.head.as_deref().and_then(|digest| self.get(digest)).map(|entry| &entry.op)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| BlubberError::Marshal {
                what: "build definition".into(),
                reason: e.to_string(),
            })
    }
}
