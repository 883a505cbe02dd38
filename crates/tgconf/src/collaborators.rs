//! external collaborators
//!
//! The engine never downloads sources, talks to an identity service or runs processes itself. These capabilities
//! are injected through the traits below. Calls that may be slow receive the run's [Cancellation] so an
//! implementation can give up early.
use crate::dispatch::{CommandDescriptor, FileImport};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(thiserror::Error, Debug)]
pub enum CollaboratorError {
    #[error("operation cancelled")]
    Cancelled,
    #[error("no {0} configured")]
    NotConfigured(&'static str),
    #[error("{0}")]
    Failed(String),
    #[error("IO error")]
    Io(#[from] std::io::Error),
}

/// Resolves a remote document or module reference to a local path
pub trait SourceFetcher: Send + Sync {
    fn fetch(
        &self,
        source: &str,
        destination_hint: &Path,
        cancellation: &Cancellation,
    ) -> Result<PathBuf, CollaboratorError>;
}

pub trait IdentityProvider: Send + Sync {
    fn current_account_id(&self, cancellation: &Cancellation) -> Result<String, CollaboratorError>;

    /// Environment overlay holding the credentials of the assumed role
    fn assume_role(
        &self,
        role_arn: &str,
        session_name: &str,
        duration: Duration,
        cancellation: &Cancellation,
    ) -> Result<IndexMap<String, String>, CollaboratorError>;
}

pub trait ParameterStore: Send + Sync {
    fn get_parameter(&self, name: &str, cancellation: &Cancellation) -> Result<String, CollaboratorError>;
}

/// Executes hook and extra command descriptors
pub trait ProcessRunner {
    fn run(&self, command: &CommandDescriptor, cancellation: &Cancellation) -> Result<(), CollaboratorError>;
}

/// Copies files described by import-files definitions
pub trait FileStager {
    fn stage(&self, import: &FileImport, cancellation: &Cancellation) -> Result<(), CollaboratorError>;
}

/// Cancellation signal shared by everything working on one resolution
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Cancellation {
            cancelled: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn check(&self) -> Result<(), CollaboratorError> {
        if self.is_cancelled() {
            return Err(CollaboratorError::Cancelled);
        }
        Ok(())
    }
}

/// [IdentityProvider] wrapper memoizing the account id
pub struct CachedIdentity {
    provider: Arc<dyn IdentityProvider>,
    account_id: parking_lot::Mutex<Option<String>>,
}

impl CachedIdentity {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        CachedIdentity {
            provider,
            account_id: parking_lot::Mutex::new(None),
        }
    }

    pub fn account_id(&self, cancellation: &Cancellation) -> Result<String, CollaboratorError> {
        let mut cached = self.account_id.lock();
        if let Some(account_id) = cached.as_ref() {
            tracing::trace!("account id cache hit");
            return Ok(account_id.clone());
        }

        cancellation.check()?;
        let account_id = self.provider.current_account_id(cancellation)?;
        *cached = Some(account_id.clone());
        Ok(account_id)
    }

    pub fn provider(&self) -> &dyn IdentityProvider {
        self.provider.as_ref()
    }
}

/// Treats sources as local paths (optionally prefixed with `file://`)
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalSourceFetcher;

impl SourceFetcher for LocalSourceFetcher {
    fn fetch(
        &self,
        source: &str,
        destination_hint: &Path,
        cancellation: &Cancellation,
    ) -> Result<PathBuf, CollaboratorError> {
        cancellation.check()?;
        let path = Path::new(source.strip_prefix("file://").unwrap_or(source));
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            destination_hint.join(path)
        };

        if !path.exists() {
            return Err(CollaboratorError::Failed(format!(
                "source {} does not exist",
                path.display()
            )));
        }
        Ok(path)
    }
}

/// Everything injected into a resolution
#[derive(Clone, Default)]
pub struct Collaborators {
    pub fetcher: Option<Arc<dyn SourceFetcher>>,
    pub identity: Option<Arc<CachedIdentity>>,
    pub parameters: Option<Arc<dyn ParameterStore>>,
    pub cancellation: Cancellation,
}

impl Collaborators {
    pub fn with_fetcher(mut self, fetcher: impl SourceFetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    pub fn with_identity(mut self, provider: impl IdentityProvider + 'static) -> Self {
        self.identity = Some(Arc::new(CachedIdentity::new(Arc::new(provider))));
        self
    }

    pub fn with_parameter_store(mut self, store: impl ParameterStore + 'static) -> Self {
        self.parameters = Some(Arc::new(store));
        self
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn fetch(&self, source: &str, destination_hint: &Path) -> Result<PathBuf, CollaboratorError> {
        self.cancellation.check()?;
        match &self.fetcher {
            Some(fetcher) => fetcher.fetch(source, destination_hint, &self.cancellation),
            None => LocalSourceFetcher.fetch(source, destination_hint, &self.cancellation),
        }
    }

    pub fn account_id(&self) -> Result<String, CollaboratorError> {
        let identity = self
            .identity
            .as_ref()
            .ok_or(CollaboratorError::NotConfigured("identity provider"))?;
        identity.account_id(&self.cancellation)
    }

    pub fn parameter(&self, name: &str) -> Result<String, CollaboratorError> {
        self.cancellation.check()?;
        let store = self
            .parameters
            .as_ref()
            .ok_or(CollaboratorError::NotConfigured("parameter store"))?;
        store.get_parameter(name, &self.cancellation)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    /// Identity provider counting how often it is asked
    #[derive(Default)]
    pub(crate) struct CountingIdentity {
        pub calls: Arc<AtomicUsize>,
    }

    impl IdentityProvider for CountingIdentity {
        fn current_account_id(&self, _: &Cancellation) -> Result<String, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("123456789012".to_string())
        }

        fn assume_role(
            &self,
            _: &str,
            _: &str,
            _: Duration,
            _: &Cancellation,
        ) -> Result<IndexMap<String, String>, CollaboratorError> {
            Ok(IndexMap::new())
        }
    }

    #[test]
    fn account_id_is_cached() {
        let identity = CountingIdentity::default();
        let calls = Arc::clone(&identity.calls);
        let collaborators = Collaborators::default().with_identity(identity);

        assert_eq!(collaborators.account_id().expect("account"), "123456789012");
        assert_eq!(collaborators.account_id().expect("account"), "123456789012");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_collaborators() {
        let collaborators = Collaborators::default();
        assert!(matches!(
            collaborators.account_id(),
            Err(CollaboratorError::NotConfigured(_))
        ));
        assert!(matches!(
            collaborators.parameter("x"),
            Err(CollaboratorError::NotConfigured(_))
        ));
    }

    #[test]
    fn cancellation_is_propagated() {
        let cancellation = Cancellation::new();
        let collaborators = Collaborators::default()
            .with_identity(CountingIdentity::default())
            .with_cancellation(cancellation.clone());
        cancellation.cancel();

        assert!(matches!(
            collaborators.account_id(),
            Err(CollaboratorError::Cancelled)
        ));
        assert!(matches!(
            collaborators.fetch("/tmp", Path::new("/")),
            Err(CollaboratorError::Cancelled)
        ));
        assert!(Cancellation::with_timeout(Duration::ZERO).is_cancelled());
    }

    #[test]
    fn local_fetcher() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetched = LocalSourceFetcher
            .fetch(
                &format!("file://{}", dir.path().display()),
                Path::new("/"),
                &Cancellation::new(),
            )
            .expect("exists");
        assert_eq!(fetched, dir.path());

        LocalSourceFetcher
            .fetch("does-not-exist", dir.path(), &Cancellation::new())
            .expect_err("must error");
    }
}
