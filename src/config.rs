//! Server configuration, loaded from CLI flags (or environment variables
//! of the same name) via `clap`.

use clap::Parser;

#[derive(Parser, Clone, Debug)]
#[command(name = "ldapd", about = "An async LDAPv3 directory server core")]
pub struct Config {
    /// Address the plain LDAP listener binds to.
    #[arg(long, env = "LDAPD_PLAIN_ADDRESS", default_value = "0.0.0.0:389")]
    pub plain_address: String,

    /// Address the LDAPS listener binds to; omit to disable LDAPS.
    #[arg(long, env = "LDAPD_LDAPS_ADDRESS")]
    pub ldaps_address: Option<String>,

    /// Hard ceiling on a search's size limit, regardless of what the client requests.
    #[arg(long, env = "LDAPD_MAX_SIZE_LIMIT", default_value_t = 1000)]
    pub max_size_limit: i64,

    /// Size limit used when a client's SearchRequest specifies zero (unlimited).
    #[arg(long, env = "LDAPD_DEFAULT_SIZE_LIMIT", default_value_t = 100)]
    pub default_size_limit: i64,

    /// Hard ceiling on a search's time limit, in seconds.
    #[arg(long, env = "LDAPD_MAX_TIME_LIMIT_SECS", default_value_t = 3600)]
    pub max_time_limit_secs: i64,

    /// Time limit used when a client's SearchRequest specifies zero.
    #[arg(long, env = "LDAPD_DEFAULT_TIME_LIMIT_SECS", default_value_t = 60)]
    pub default_time_limit_secs: i64,

    /// How long an idle paged-search cursor lives before being reaped.
    #[arg(long, env = "LDAPD_PAGED_STATE_TIMEOUT_SECS", default_value_t = 300)]
    pub paged_state_timeout_secs: u64,

    /// Maximum number of concurrently open paged-search cursors.
    #[arg(long, env = "LDAPD_PAGED_STATE_MAX_STATES", default_value_t = 1000)]
    pub paged_state_max_states: usize,

    /// Maximum filter AST nesting depth accepted during decode.
    #[arg(long, env = "LDAPD_FILTER_MAX_DEPTH", default_value_t = 100)]
    pub filter_max_depth: u32,

    /// How long a write may block before the connection is closed.
    #[arg(long, env = "LDAPD_WRITE_DEADLINE_SECS", default_value_t = 30)]
    pub write_deadline_secs: u64,

    /// How long a read may block before the connection is closed.
    #[arg(long, env = "LDAPD_READ_DEADLINE_SECS", default_value_t = 300)]
    pub read_deadline_secs: u64,

    /// PEM certificate chain; presence (with `tls_key_path`) enables StartTLS and LDAPS.
    #[arg(long, env = "LDAPD_TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// PEM private key matching `tls_cert_path`.
    #[arg(long, env = "LDAPD_TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    /// How long connection teardown waits for in-flight operations to drain.
    #[arg(long, env = "LDAPD_SHUTDOWN_GRACE_SECS", default_value_t = 30)]
    pub shutdown_grace_secs: u64,

    /// Naming contexts advertised in the Root DSE; semicolon-separated since a DN itself contains commas.
    #[arg(long, env = "LDAPD_NAMING_CONTEXTS", value_delimiter = ';', default_value = "dc=example,dc=com")]
    pub naming_contexts: Vec<String>,
}

impl Config {
    pub fn tls_enabled(&self) -> bool {
        self.tls_cert_path.is_some() && self.tls_key_path.is_some()
    }
}
