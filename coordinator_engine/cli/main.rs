/// Command-line party for the threshold session coordinator.
///
/// Each invocation is one party: it joins a session on a remote coordinator and runs its
/// side of the protocol to completion.
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use coordinator_engine::driver::RoundDriver;
use coordinator_engine::logging::init_console_logging;
use coordinator_engine::wire::StatusResponse;
use coordinator_engine::{
    CoordinatorApi, FrostKeygen, FrostSigner, HttpCoordinator, KeyShare, PartyId, PollPolicy,
    SessionKind, SigningRequest,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "coordinator", version, about = "Threshold session coordinator client")]
struct Cli {
    /// Coordinator base URL
    #[arg(long, global = true, env = "COORDINATOR_API", default_value = "http://localhost:8080")]
    api: String,

    /// Give up on any single wait after this many seconds (0 waits forever)
    #[arg(long, global = true, default_value_t = 600)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a keygen session and print its ID
    InitiateKeygen {
        #[arg(short)]
        t: u16,
        #[arg(short)]
        n: u16,
    },

    /// Join a keygen session, run the DKG and save the resulting key share
    Keygen {
        #[arg(long)]
        session: String,

        /// Where to write the key share (JSON)
        #[arg(long)]
        out: PathBuf,
    },

    /// Join (or create) a signing session and produce a verified signature
    Sign {
        #[arg(long)]
        session: String,

        /// Key share written by `keygen`
        #[arg(long)]
        share: PathBuf,

        /// Number of signers taking part; every one of them must join
        #[arg(long)]
        signers: u16,

        /// Signing slot (1..=signers); defaults to the share's party ID
        #[arg(long)]
        party: Option<u16>,

        /// Stage the payload for everyone to sign
        #[arg(long, requires = "payload_hex")]
        initiate: bool,

        #[arg(long)]
        payload_hex: Option<String>,

        /// Initiator only: finalize (and close) the session after signing
        #[arg(long, requires = "initiate")]
        finalize: bool,

        /// Pause before finalizing so slower signers can collect the last round
        #[arg(long, default_value_t = 5)]
        finalize_grace_secs: u64,
    },

    /// Print a session's status
    Status {
        #[arg(long)]
        session: String,

        /// Look in the signing registry instead of keygen
        #[arg(long)]
        signing: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_console_logging();
    let cli = Cli::parse();

    let api = HttpCoordinator::new(&cli.api).context("cannot reach coordinator")?;
    let timeout = (cli.timeout_secs > 0).then(|| Duration::from_secs(cli.timeout_secs));
    let policy = PollPolicy::default().with_timeout(timeout);

    // Ctrl-C cancels whichever wait the driver is in.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted; cancelling");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::InitiateKeygen { t, n } => {
            let session_id = api.initiate_keygen(t, n).await?;
            println!("{session_id}");
        }

        Commands::Keygen { session, out } => {
            let driver = RoundDriver::new(api, policy).with_cancellation(cancel);
            let share = driver.run_keygen(&session, FrostKeygen::new).await?;

            let json = share.to_json()?;
            std::fs::write(&out, json.as_bytes())
                .with_context(|| format!("cannot write key share to {}", out.display()))?;
            info!(party_id = %share.party_id, path = %out.display(), "key share saved");
            println!("Group public key: {}", share.group_key);
        }

        Commands::Sign {
            session,
            share,
            signers,
            party,
            initiate,
            payload_hex,
            finalize,
            finalize_grace_secs,
        } => {
            let text = Zeroizing::new(
                std::fs::read_to_string(&share)
                    .with_context(|| format!("cannot read key share {}", share.display()))?,
            );
            let key_share = KeyShare::from_json(&text)?;

            let party = PartyId(party.unwrap_or(key_share.party_id.0));
            if party.0 == 0 || party.0 > signers {
                bail!("signing slot {party} is outside 1..={signers}; pass --party");
            }
            let payload = match (initiate, payload_hex) {
                (true, Some(hex_text)) => Some(hex::decode(hex_text.trim()).context("invalid --payload-hex")?),
                _ => None,
            };

            // Every signer must join and contribute, so t = n = signers for the session.
            let request = SigningRequest {
                session_id: session,
                party_id: party,
                threshold: signers,
                total_parties: signers,
                payload,
            };
            let driver = RoundDriver::new(api, policy).with_cancellation(cancel);
            let signed = driver.run_signing(&request, FrostSigner::new(key_share)).await?;
            println!("Signature: {}", hex::encode(&signed.signature));

            if finalize {
                tokio::time::sleep(Duration::from_secs(finalize_grace_secs)).await;
                let receipt = driver.finalize(&signed).await?;
                println!(
                    "Finalized: {} byte transaction {}",
                    receipt.transaction_length, receipt.transaction_digest
                );
            }
        }

        Commands::Status { session, signing } => {
            let kind = if signing {
                SessionKind::Signing
            } else {
                SessionKind::Keygen
            };
            let status = api.status(kind, &session).await?;
            let view = StatusResponse::from(status);
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
    }

    Ok(())
}
