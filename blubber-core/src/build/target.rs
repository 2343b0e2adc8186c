//! Per-variant compilation targets.
//!
//! A [`Target`] pairs the build state of one variant with the image config
//! that variant produces. Instructions compile against it in order; every
//! operation only ever extends the state.

use super::graph::{FileAction, Owner, State};
use super::image::Image;
use super::instruction::{Run, RunAll};
use super::options::{Options, Platform};
use super::resolver::{normalize_image_ref, ImageMetaResolver, ResolvedImage};
use crate::error::{BlubberError, Result};
use crate::paths;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// The named local build context.
pub const LOCAL_CONTEXT: &str = "context";

#[derive(Debug, Clone)]
pub struct Target {
    name: String,
    base: String,
    options: Arc<Options>,
    state: State,
    image: Image,
    /// Final states of the variants this one copies from
    peers: BTreeMap<String, State>,
}

impl Target {
    pub fn new(name: &str, base: &str, options: Arc<Options>) -> Self {
        let image = Image::new(&options.target_platform);

        Self {
            name: name.to_string(),
            base: base.to_string(),
            options,
            state: State::scratch(),
            image,
            peers: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn platform(&self) -> &Platform {
        &self.options.target_platform
    }

    /// Seeds the build state and image config from a resolved base image,
    /// or from scratch when there is none.
    ///
    /// The base image's environment, working directory and user carry over
    /// into the build state. Platform variables are added for every exec.
    #[instrument(skip(self, base), fields(variant = %self.name))]
    pub fn initialize(&mut self, base: Option<ResolvedImage>) {
        let platform = self.options.target_platform.clone();

        let mut state = match base {
            Some(resolved) => {
                info!("[{}] FROM {}", self.name, resolved.reference);

                let mut image = resolved.image;
                image.set_platform(&platform);

                if image.config.working_dir.is_empty() {
                    image.config.working_dir = "/".into();
                }

                let mut state =
                    State::image(&resolved.reference, resolved.digest.as_deref(), Some(&platform))
                        .with_dir(&image.config.working_dir)
                        .with_user(&image.config.user);

                for (key, value) in image.env() {
                    state = state.add_env(&key, &value);
                }

                self.image = image;
                state
            }
            None => {
                info!("[{}] FROM scratch", self.name);
                State::scratch().with_platform(platform.clone())
            }
        };

        for (key, value) in platform_env(&self.options.build_platform, &platform) {
            state = state.add_env(key, &value);
        }

        self.image.add_labels(&self.options.labels);
        self.state = state;
    }

    /// Makes the final state of `peer` available to [`Target::copy_from`].
    pub fn link(&mut self, peer: &str, state: State) {
        self.peers.insert(peer.to_string(), state);
    }

    /// Exposes a build argument as an environment variable. A value given in
    /// the options wins over `default`.
    pub fn expose_build_arg(&mut self, name: &str, default: &str) {
        let value = self.options.build_args.get(name).map(String::as_str).unwrap_or(default);

        debug!(variant = %self.name, "ARG {}={}", name, value);
        self.state = self.state.add_env(name, value);
    }

    /// Sets environment variables in key order. Values may refer to
    /// variables already set.
    pub fn add_env(&mut self, env: &BTreeMap<String, String>) {
        for (key, value) in env {
            let value = self.expand_env(value);

            self.state = self.state.add_env(key, &value);
            self.image.add_env(key, &value);
        }
    }

    pub fn add_labels(&mut self, labels: &BTreeMap<String, String>) {
        self.image.add_labels(labels);
    }

    pub fn add_volume(&mut self, path: &str) {
        let path = paths::resolve(self.state.dir(), &self.expand_env(path));

        self.state = self
            .state
            .file(vec![FileAction::mkdir(&path, None)])
            .described(format!("[{}] VOLUME {}", self.name, path));
        self.image.add_volume(&path);
    }

    /// Copies files from the local build context.
    pub fn copy_from_client(
        &mut self,
        sources: &[String],
        destination: &str,
        owner: Option<Owner>,
    ) {
        let context = State::local(LOCAL_CONTEXT);
        self.copy(&context, LOCAL_CONTEXT, "/", sources, destination, owner);
    }

    /// Copies files from a peer variant's final state, or from an image
    /// when `from` names no peer.
    pub fn copy_from(
        &mut self,
        from: &str,
        sources: &[String],
        destination: &str,
        owner: Option<Owner>,
    ) -> Result<()> {
        let source = match self.peers.get(from) {
            Some(state) => state.clone(),
            None => {
                let reference = normalize_image_ref(from)?;
                State::image(&reference, None, Some(&self.options.target_platform))
            }
        };

        let source_dir = source.dir().to_string();
        self.copy(&source, from, &source_dir, sources, destination, owner);

        Ok(())
    }

    fn copy(
        &mut self,
        source: &State,
        from: &str,
        source_dir: &str,
        sources: &[String],
        destination: &str,
        owner: Option<Owner>,
    ) {
        if source.is_scratch() {
            debug!(variant = %self.name, from, "source has no files, skipping copy");
            return;
        }

        let mut destination = paths::resolve(self.state.dir(), &self.expand_env(destination));

        if sources.len() > 1 && !destination.ends_with('/') {
            destination.push('/');
        }

        let input = self.state.source_input();
        let actions = sources
            .iter()
            .map(|src| {
                FileAction::copy(input, &paths::resolve(source_dir, src), &destination, owner)
            })
            .collect();

        let description =
            format!("[{}] COPY --from={} {} {}", self.name, from, sources.join(" "), destination);

        self.state = self.state.copy(source, actions).described(description);
    }

    pub fn run(&mut self, run: &Run) -> Result<()> {
        let command = run.compile()?;
        self.run_shell(&command);
        Ok(())
    }

    pub fn run_all(&mut self, run_all: &RunAll) -> Result<()> {
        if run_all.runs.is_empty() {
            return Ok(());
        }

        let command = run_all.compile()?;
        self.run_shell(&command);
        Ok(())
    }

    fn run_shell(&mut self, command: &str) {
        let args = vec!["/bin/sh".to_string(), "-c".to_string(), command.to_string()];

        self.state =
            self.state.run(args, false).described(format!("[{}] RUN {}", self.name, command));
    }

    /// Runs the image's entrypoint with `args`, bypassing the cache so that
    /// it always executes.
    #[instrument(skip_all, fields(variant = %self.name))]
    pub fn run_entrypoint(
        &mut self,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<()> {
        let entrypoint = self.image.entrypoint();

        if entrypoint.is_empty() {
            return Err(BlubberError::Instruction {
                instruction: "run-entrypoint".into(),
                reason: format!("variant '{}' has no entrypoint", self.name),
            });
        }

        let command: Vec<String> = entrypoint.iter().chain(args).cloned().collect();

        let mut state = self.state.clone();
        for (key, value) in env {
            let value = self.expand_env(value);
            state = state.add_env(key, &value);
        }

        info!("[{}] RUN {}", self.name, command.join(" "));

        let description = format!("[{}] ENTRYPOINT {}", self.name, command.join(" "));
        self.state = state.run(command, true).described(description);

        Ok(())
    }

    pub fn working_directory(&mut self, dir: &str) {
        self.state = self.state.with_dir(&self.expand_env(dir));
        self.image.config.working_dir = self.state.dir().to_string();
    }

    pub fn user(&mut self, user: &str) {
        let user = self.expand_env(user);

        self.state = self.state.with_user(&user);
        self.image.config.user = user;
    }

    pub fn set_entrypoint(&mut self, entrypoint: &[String]) {
        self.image.set_entrypoint(entrypoint);
    }

    /// Substitutes `$VAR` and `${VAR}` from the build environment. Unknown
    /// variables expand to the empty string.
    pub fn expand_env(&self, s: &str) -> String {
        expand(s, |key| self.state.get_env(key).unwrap_or_default().to_string())
    }

    /// Serialized build graph and image config.
    #[instrument(skip(self), fields(variant = %self.name))]
    pub fn marshal(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let definition = self.state.marshal();

        debug!(ops = definition.ops.len(), "marshalled build graph");

        Ok((definition.to_bytes()?, self.image.to_json()?))
    }
}

/// `BUILD*` and `TARGET*` platform variables.
fn platform_env(build: &Platform, target: &Platform) -> Vec<(&'static str, String)> {
    vec![
        ("BUILDPLATFORM", build.to_string()),
        ("BUILDOS", build.os.clone()),
        ("BUILDARCH", build.architecture.clone()),
        ("BUILDVARIANT", build.variant.clone().unwrap_or_default()),
        ("TARGETPLATFORM", target.to_string()),
        ("TARGETOS", target.os.clone()),
        ("TARGETARCH", target.architecture.clone()),
        ("TARGETVARIANT", target.variant.clone().unwrap_or_default()),
    ]
}

/// Shell-style expansion. `$` followed by anything other than a name is
/// kept; malformed `${` forms are dropped.
fn expand(s: &str, lookup: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(idx) = rest.find('$') {
        out.push_str(&rest[..idx]);
        let after = &rest[idx + 1..];

        match shell_name(after) {
            (Some(name), width) => {
                out.push_str(&lookup(name));
                rest = &after[width..];
            }
            (None, 0) => {
                out.push('$');
                rest = after;
            }
            (None, width) => rest = &after[width..],
        }
    }

    out.push_str(rest);
    out
}

/// The variable name at the start of `s` and how many bytes it spans.
fn shell_name(s: &str) -> (Option<&str>, usize) {
    let bytes = s.as_bytes();

    match bytes.first() {
        None => (None, 0),
        Some(b'{') => {
            if bytes.len() > 2 && is_special(bytes[1]) && bytes[2] == b'}' {
                return (Some(&s[1..2]), 3);
            }

            match s[1..].find('}') {
                Some(0) => (None, 2),
                Some(end) => (Some(&s[1..1 + end]), end + 2),
                None => (None, 1),
            }
        }
        Some(&c) if is_special(c) => (Some(&s[..1]), 1),
        Some(_) => {
            let end = bytes.iter().take_while(|b| b.is_ascii_alphanumeric() || **b == b'_').count();

            if end == 0 {
                (None, 0)
            } else {
                (Some(&s[..end]), end)
            }
        }
    }
}

fn is_special(c: u8) -> bool {
    matches!(c, b'*' | b'#' | b'$' | b'@' | b'!' | b'?' | b'-') || c.is_ascii_digit()
}

/// Targets of one compilation, in dependency order.
#[derive(Debug, Default)]
pub struct TargetGroup {
    targets: Vec<Target>,
}

impl TargetGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, target: Target) {
        self.targets.push(target);
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Target> {
        self.targets.iter_mut().find(|t| t.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter()
    }

    /// Removes and returns the last target.
    pub fn pop(&mut self) -> Option<Target> {
        self.targets.pop()
    }

    /// Resolves every target's base image concurrently, then initializes the
    /// targets in order.
    ///
    /// The first failure cancels the lookups still in flight and is returned,
    /// wrapped with the name of its variant.
    #[instrument(skip_all, fields(targets = self.targets.len()))]
    pub async fn initialize_all(&mut self, resolver: Arc<dyn ImageMetaResolver>) -> Result<()> {
        let token = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for (index, target) in self.targets.iter().enumerate() {
            if target.base.is_empty() {
                continue;
            }

            let resolver = Arc::clone(&resolver);
            let token = token.clone();
            let base = target.base.clone();
            let name = target.name.clone();
            let platform = target.options.target_platform.clone();
            let timeout = target.options.meta_resolve_timeout;

            tasks.spawn(async move {
                let lookup = async {
                    let resolve = resolver.resolve_image_config(&base, &platform);

                    match timeout {
                        Some(limit) => {
                            tokio::time::timeout(limit, resolve).await.unwrap_or_else(|_| {
                                Err(BlubberError::BaseImageResolution {
                                    image: base.clone(),
                                    reason: format!("timed out after {:?}", limit),
                                })
                            })
                        }
                        None => resolve.await,
                    }
                };

                let result = tokio::select! {
                    _ = token.cancelled() => Err(BlubberError::Cancelled),
                    result = lookup => result,
                };

                (index, result.map_err(|e| BlubberError::compile(name, e)))
            });
        }

        let mut resolved: BTreeMap<usize, ResolvedImage> = BTreeMap::new();
        let mut first_error: Option<BlubberError> = None;

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok((index, result)) => result.map(|image| (index, image)),
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    Err(BlubberError::Other(anyhow::anyhow!("initialization task failed: {}", e)))
                }
            };

            match outcome {
                Ok((index, image)) => {
                    resolved.insert(index, image);
                }
                Err(e) if first_error.is_none() => {
                    warn!(error = %e, "initialization failed, cancelling");
                    token.cancel();
                    first_error = Some(e);
                }
                Err(e) => debug!(error = %e, "initialization failed after cancellation"),
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        for (index, target) in self.targets.iter_mut().enumerate() {
            target.initialize(resolved.remove(&index));
        }

        Ok(())
    }
}
