//! Wires [`Config`](crate::config::Config) into a fully-constructed
//! [`AppState`], choosing the in-memory or Postgres storage backend and
//! constructing every business-logic crate over it.
//!
//! A connection pool is opened and migrated once (Postgres only), then every repository
//! trait object is built over either that pool or the in-memory maps,
//! and the business-logic crates are constructed over the repositories
//! in dependency order (`license-core` has none; `license-issuer`
//! depends on `license-registry` and `license-vault`; and so on).

use std::sync::Arc;

use license_file::LicenseFileBundler;
use license_issuer::SiteIssuer;
use license_keystore::KeyStore;
use license_ledger::UsageLedger;
use license_manifest::ManifestEmitter;
use license_registry::{CmlRegistry, OrganizationRegistry};
use license_storage::memory::{
    MemoryCmlRepository, MemoryKeyStoreRepository, MemoryOrgKeyRepository,
    MemoryOrganizationRepository, MemorySiteLicenseRepository, MemoryUsageLedgerRepository,
    MemoryUsageManifestRepository,
};
use license_storage::postgres::{
    PgCmlRepository, PgKeyStoreRepository, PgOrgKeyRepository, PgOrganizationRepository,
    PgSiteLicenseRepository, PgUsageLedgerRepository, PgUsageManifestRepository,
};
use license_storage::{
    CmlRepository, KeyStoreRepository, OrgKeyRepository, OrganizationRepository,
    SiteLicenseRepository, UsageLedgerRepository, UsageManifestRepository,
};
use license_vault::OrgKeyVault;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::{Config, StorageBackend};
use crate::state::AppState;

/// Every repository trait object `AppState` needs, picked by backend.
struct Repositories {
    orgs: Arc<dyn OrganizationRepository>,
    cmls: Arc<dyn CmlRepository>,
    org_keys: Arc<dyn OrgKeyRepository>,
    sites: Arc<dyn SiteLicenseRepository>,
    manifests: Arc<dyn UsageManifestRepository>,
    ledger: Arc<dyn UsageLedgerRepository>,
    kms_keys: Arc<dyn KeyStoreRepository>,
}

/// Open a Postgres pool and run the embedded migrations. 20 max / 2 min
/// connections and a 5s acquire timeout — generous enough for a service
/// this size without starving other pool consumers during a migration.
async fn connect_postgres(dsn: &str) -> Result<PgPool, BootstrapError> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(dsn)
        .await?;

    license_storage::postgres::run_migrations(&pool).await?;

    Ok(pool)
}

/// Failure modes of [`bootstrap`]: a bad Postgres DSN/connection, or a
/// migration that didn't apply cleanly.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// Connecting to Postgres failed.
    #[error("database connection failed: {0}")]
    Connect(#[from] sqlx::Error),
    /// Running the embedded migrations failed.
    #[error("migration failed: {0}")]
    Migrate(#[from] license_storage::StorageError),
}

async fn build_repositories(config: &Config) -> Result<Repositories, BootstrapError> {
    match &config.storage {
        StorageBackend::Memory => {
            let ledger_repo = MemoryUsageLedgerRepository::new();
            let sites = Arc::new(MemorySiteLicenseRepository::new(ledger_repo.shared_rows()));
            let manifests = Arc::new(MemoryUsageManifestRepository::new(ledger_repo.shared_rows()));
            Ok(Repositories {
                orgs: Arc::new(MemoryOrganizationRepository::new()),
                cmls: Arc::new(MemoryCmlRepository::new()),
                org_keys: Arc::new(MemoryOrgKeyRepository::new()),
                sites,
                manifests,
                ledger: Arc::new(ledger_repo),
                kms_keys: Arc::new(MemoryKeyStoreRepository::new()),
            })
        }
        StorageBackend::Postgres(dsn) => {
            let pool = connect_postgres(dsn).await?;
            Ok(Repositories {
                orgs: Arc::new(PgOrganizationRepository::new(pool.clone())),
                cmls: Arc::new(PgCmlRepository::new(pool.clone())),
                org_keys: Arc::new(PgOrgKeyRepository::new(pool.clone())),
                sites: Arc::new(PgSiteLicenseRepository::new(pool.clone())),
                manifests: Arc::new(PgUsageManifestRepository::new(pool.clone())),
                ledger: Arc::new(PgUsageLedgerRepository::new(pool.clone())),
                kms_keys: Arc::new(PgKeyStoreRepository::new(pool)),
            })
        }
    }
}

/// Build a fully-wired [`AppState`] from [`Config`]. The only fallible
/// step beyond config loading itself is the Postgres connect+migrate;
/// in-memory storage cannot fail here.
pub async fn bootstrap(config: Config) -> Result<AppState, BootstrapError> {
    let repos = build_repositories(&config).await?;

    let orgs = Arc::new(OrganizationRegistry::new(repos.orgs.clone()));
    let cmls = Arc::new(CmlRegistry::new(repos.orgs, repos.cmls));
    let vault = Arc::new(
        OrgKeyVault::new(repos.org_keys, config.encryption_password.clone())
            .expect("ENCRYPTION_PASSWORD length is validated by Config::from_env"),
    );
    let issuer = Arc::new(SiteIssuer::new(
        cmls.clone(),
        vault.clone(),
        repos.sites.clone(),
        repos.ledger.clone(),
    ));
    let manifests = Arc::new(ManifestEmitter::new(
        repos.sites.clone(),
        repos.manifests,
        vault.clone(),
    ));
    let keystore = Arc::new(KeyStore::new(repos.kms_keys, config.kms_master_key.clone()));
    let files = Arc::new(LicenseFileBundler::new(keystore.clone()));
    let ledger = Arc::new(UsageLedger::new(repos.ledger));

    Ok(AppState {
        orgs,
        cmls,
        vault,
        issuer,
        manifests,
        keystore,
        files,
        ledger,
        sites_repo: repos.sites,
        master_key: config.kms_master_key,
        root_public_pem: config.root_public_key,
        jwt_secret: Arc::from(config.jwt_secret.as_str()),
    })
}

/// An [`AppState`] wired entirely over in-memory storage, for use in
/// this crate's own router tests.
#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    use license_keystore::MasterKey;

    let orgs_repo: Arc<dyn OrganizationRepository> = Arc::new(MemoryOrganizationRepository::new());
    let cml_repo: Arc<dyn CmlRepository> = Arc::new(MemoryCmlRepository::new());
    let org_key_repo: Arc<dyn OrgKeyRepository> = Arc::new(MemoryOrgKeyRepository::new());
    let ledger_store = MemoryUsageLedgerRepository::new();
    let sites_repo: Arc<dyn SiteLicenseRepository> =
        Arc::new(MemorySiteLicenseRepository::new(ledger_store.shared_rows()));
    let manifest_repo: Arc<dyn UsageManifestRepository> =
        Arc::new(MemoryUsageManifestRepository::new(ledger_store.shared_rows()));
    let ledger_repo: Arc<dyn UsageLedgerRepository> = Arc::new(ledger_store);
    let kms_repo: Arc<dyn KeyStoreRepository> = Arc::new(MemoryKeyStoreRepository::new());

    let orgs = Arc::new(OrganizationRegistry::new(orgs_repo.clone()));
    let cmls = Arc::new(CmlRegistry::new(orgs_repo, cml_repo));
    let vault = Arc::new(OrgKeyVault::new(org_key_repo, "a sufficiently long test password").unwrap());
    let issuer = Arc::new(SiteIssuer::new(cmls.clone(), vault.clone(), sites_repo.clone(), ledger_repo.clone()));
    let manifests = Arc::new(ManifestEmitter::new(sites_repo.clone(), manifest_repo, vault.clone()));
    let master_key = MasterKey::from_bytes([7u8; 32]).unwrap();
    let keystore = Arc::new(KeyStore::new(kms_repo, master_key.clone()));
    let files = Arc::new(LicenseFileBundler::new(keystore.clone()));
    let ledger = Arc::new(UsageLedger::new(ledger_repo));

    AppState {
        orgs,
        cmls,
        vault,
        issuer,
        manifests,
        keystore,
        files,
        ledger,
        sites_repo,
        master_key,
        root_public_pem: None,
        jwt_secret: Arc::from("a sufficiently long test jwt secret"),
    }
}
