//! `spmd provider` subcommands: registry operations against a running
//! daemon's control API.

use clap::{Args, Subcommand};
use serde::Serialize;
use spm_state::{NewProvider, Registration};
use tracing::info;

use crate::client::ApiClient;

#[derive(Subcommand)]
pub enum ProviderCommand {
    /// Register a provider, or update the one already registered under the name.
    Register(RegisterArgs),

    /// List registered providers.
    List {
        /// Only show providers of this service type.
        #[arg(long)]
        service_type: Option<String>,
    },

    /// Show one provider by id or name.
    Show {
        /// Provider id or name.
        provider: String,
    },

    /// Update the registry fields of a provider.
    Update {
        /// Provider id.
        provider_id: String,

        #[command(flatten)]
        fields: RegisterArgs,
    },

    /// Remove a provider.
    Remove {
        /// Provider id.
        id: String,
    },
}

#[derive(Args)]
pub struct RegisterArgs {
    /// Unique provider name.
    #[arg(long)]
    pub name: String,

    /// Service type implemented by the provider (e.g. "vm").
    #[arg(long)]
    pub service_type: String,

    /// Service type schema version.
    #[arg(long, default_value = "v1alpha1")]
    pub schema_version: String,

    /// Base URL of the provider; liveness probes hit `{endpoint}/health`.
    #[arg(long)]
    pub endpoint: String,

    /// Register under this id instead of a generated one (ignored on update).
    #[arg(long)]
    pub id: Option<String>,
}

impl From<RegisterArgs> for NewProvider {
    fn from(args: RegisterArgs) -> Self {
        NewProvider {
            id: args.id,
            name: args.name,
            service_type: args.service_type,
            schema_version: args.schema_version,
            endpoint: args.endpoint,
        }
    }
}

pub async fn execute(client: &ApiClient, command: ProviderCommand) -> anyhow::Result<()> {
    match command {
        ProviderCommand::Register(args) => {
            let registration = client.register(&args.into()).await?;
            let provider = &registration.provider;
            match registration.status {
                Registration::Registered => {
                    info!(id = %provider.id, name = %provider.name, "provider registered")
                }
                Registration::Updated => {
                    info!(id = %provider.id, name = %provider.name, "provider updated")
                }
            }
            print_json(&registration)
        }
        ProviderCommand::List { service_type } => {
            let providers = client.list(service_type.as_deref()).await?;
            print_json(&providers)
        }
        ProviderCommand::Show { provider } => print_json(&client.get(&provider).await?),
        ProviderCommand::Update {
            provider_id,
            fields,
        } => {
            let updated = client.update(&provider_id, &fields.into()).await?;
            info!(id = %provider_id, name = %updated.name, "provider updated");
            print_json(&updated)
        }
        ProviderCommand::Remove { id } => {
            client.delete(&id).await?;
            info!(%id, "provider removed");
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
