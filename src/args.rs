use clap::{Parser, Subcommand};
use std::path::PathBuf;

use easystream_viewer::api::types::{StreamStatus, StreamVisibility};
use easystream_viewer::api::ListQuery;
use easystream_viewer::auth::{AccessCredentialProof, StreamId};
use easystream_viewer::config::{self, NegotiationMode};

#[derive(Parser, Debug)]
#[command(name = "easystream-viewer")]
#[command(author = "Easy Stream Team")]
#[command(version = "0.1.0")]
#[command(about = "Guest access and WebRTC playback client for Easy Stream", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "/etc/easystream-viewer.toml")]
    pub config: PathBuf,

    /// Verbose logging
    #[arg(short, long, global = true, action)]
    pub verbose: bool,

    /// Override the platform API base URL
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Operator bearer token, enables full stream records
    #[arg(long, global = true, env = "EASYSTREAM_OPERATOR_TOKEN", hide_env_values = true)]
    pub operator_token: Option<String>,

    /// Negotiation endpoint (proxy or edge)
    #[arg(long, global = true)]
    pub mode: Option<NegotiationMode>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List streams visible to this viewer
    List {
        /// Filter by status (idle, pushing, ended)
        #[arg(long)]
        status: Option<StreamStatus>,

        /// Filter by visibility (public, private)
        #[arg(long)]
        visibility: Option<StreamVisibility>,

        #[arg(long)]
        page: Option<u32>,

        #[arg(long)]
        page_size: Option<u32>,

        /// Full operator records, including stream keys
        #[arg(long, action)]
        all: bool,

        /// Keep re-fetching the guest listing until Ctrl-C
        #[arg(long, action, conflicts_with = "all")]
        follow: bool,

        #[command(flatten)]
        proof: ProofArgs,
    },

    /// Show one stream by numeric id or stream key
    Show {
        stream: StreamId,

        /// Keep re-fetching the detail while a guest token is held
        #[arg(long, action)]
        follow: bool,

        #[command(flatten)]
        proof: ProofArgs,
    },

    /// Exchange one credential for an access token
    Verify {
        #[command(flatten)]
        proof: ProofArgs,
    },

    /// Negotiate playback and report state transitions
    Watch {
        stream: StreamId,

        #[command(flatten)]
        proof: ProofArgs,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Explicit retries after a playback error
        #[arg(long, default_value = "0")]
        retries: u32,
    },
}

#[derive(clap::Args, Debug, Default)]
pub struct ProofArgs {
    /// Stream password; needs --stream-key
    #[arg(long, requires = "stream_key")]
    pub password: Option<String>,

    /// Stream key the password belongs to
    #[arg(long)]
    pub stream_key: Option<String>,

    /// 8-character share code
    #[arg(long, conflicts_with_all = ["password", "share_link"])]
    pub share_code: Option<String>,

    /// Share-link token
    #[arg(long, conflicts_with = "password")]
    pub share_link: Option<String>,

    /// Landing URL carrying access_token or share_token
    #[arg(long, conflicts_with_all = ["password", "share_code", "share_link"])]
    pub landing_url: Option<String>,
}

impl ProofArgs {
    /// Explicit proof, if one was given. Landing URLs are handled separately.
    pub fn proof(&self) -> Option<AccessCredentialProof> {
        if let (Some(password), Some(stream_key)) = (&self.password, &self.stream_key) {
            return Some(AccessCredentialProof::Password {
                stream_key: stream_key.clone(),
                password: password.clone(),
            });
        }
        if let Some(code) = &self.share_code {
            return Some(AccessCredentialProof::ShareCode { code: code.clone() });
        }
        self.share_link
            .as_ref()
            .map(|token| AccessCredentialProof::ShareLinkToken { token: token.clone() })
    }

    pub fn is_empty(&self) -> bool {
        self.proof().is_none() && self.landing_url.is_none()
    }
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config)
    }
}

/// Listing query from the `list` subcommand flags
pub fn list_query(
    status: Option<StreamStatus>,
    visibility: Option<StreamVisibility>,
    page: Option<u32>,
    page_size: Option<u32>,
) -> ListQuery {
    if status.is_none() && visibility.is_none() {
        return ListQuery {
            page,
            page_size,
            ..ListQuery::live_public()
        };
    }
    ListQuery {
        status,
        visibility,
        page,
        page_size,
    }
}
