#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line front end for S3-compatible object storage.
//!
//! ```text
//! ostore put <local> <key> [--public] [--content-type <type>]
//! ostore get <key> <local>
//! ostore stat <key>
//! ostore ls [prefix] [--recursive]
//! ostore rm <key>
//! ostore rm-prefix <prefix>
//! ostore acl <key>
//! ostore make-public <key>
//! ostore presign <key> [--ttl <secs>] [--force-download]
//! ostore sync <src> <dest-prefix> [--delete] [--public] [--verify]
//! ostore verify <local> <key>
//! ostore key <local> <dest-prefix> <root> [--prepend-bucket] [--leading-slash <policy>]
//! ```
//!
//! Connection settings come from the `OBJ_STORE_*` environment variables
//! (see [`ostore_store::StoreConfig::from_env`]). `--bucket` overrides the
//! configured bucket for a single command.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use ostore_etag::Verification;
use ostore_paths::{KeyOptions, LeadingSlash};
use ostore_store::{ObjectStoreClient, StoreConfig};
use ostore_store_models::PutOptions;
use ostore_sync::{ChangeDetection, DirectorySync, SyncOptions};

#[derive(Parser)]
#[command(name = "ostore", about = "Work with S3-compatible object storage")]
struct Cli {
    /// Bucket to use instead of `OBJ_STORE_BUCKET`.
    #[arg(long, global = true)]
    bucket: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the object key a local path maps to
    Key {
        /// Local path
        local: PathBuf,
        /// Destination key prefix
        dest_prefix: String,
        /// Local directory that maps onto the prefix
        root: PathBuf,
        /// Put the bucket name in front of the key
        #[arg(long)]
        prepend_bucket: bool,
        /// Leading slash policy
        #[arg(long, value_enum, default_value_t = SlashPolicy::Preserve)]
        leading_slash: SlashPolicy,
    },
    #[command(flatten)]
    Store(StoreCommand),
}

/// Commands that talk to the object store.
#[derive(Subcommand)]
enum StoreCommand {
    /// Upload a file
    Put {
        /// Local file to upload
        local: PathBuf,
        /// Destination key
        key: String,
        /// Make the object publicly readable
        #[arg(long)]
        public: bool,
        /// Content-Type to store (default application/octet-stream)
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Download an object
    Get {
        /// Object key
        key: String,
        /// Local destination path
        local: PathBuf,
    },
    /// Print object metadata as JSON
    Stat {
        /// Object key
        key: String,
    },
    /// List objects under a prefix
    Ls {
        /// Key prefix
        #[arg(default_value = "")]
        prefix: String,
        /// Descend into sub-prefixes
        #[arg(long, short)]
        recursive: bool,
    },
    /// Delete an object
    Rm {
        /// Object key
        key: String,
    },
    /// Delete every object under a prefix
    RmPrefix {
        /// Key prefix
        prefix: String,
    },
    /// Show the anonymous-access permission of an object
    Acl {
        /// Object key
        key: String,
    },
    /// Make an object publicly readable
    MakePublic {
        /// Object key
        key: String,
    },
    /// Print a presigned download URL
    Presign {
        /// Object key
        key: String,
        /// Seconds the URL stays valid
        #[arg(long, default_value = "3600")]
        ttl: u64,
        /// Ask browsers to save the file instead of displaying it
        #[arg(long)]
        force_download: bool,
    },
    /// Upload every file of a directory tree that is missing remotely
    Sync {
        /// Local source directory
        src: PathBuf,
        /// Destination key prefix
        dest_prefix: String,
        /// Delete local files once they are safely stored
        #[arg(long)]
        delete: bool,
        /// Upload files as publicly readable
        #[arg(long)]
        public: bool,
        /// Compare existing objects by ETag and re-upload changed files
        #[arg(long)]
        verify: bool,
    },
    /// Check whether a local file matches an object without downloading it
    Verify {
        /// Local file
        local: PathBuf,
        /// Object key
        key: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SlashPolicy {
    Preserve,
    Force,
    Strip,
}

impl From<SlashPolicy> for LeadingSlash {
    fn from(policy: SlashPolicy) -> Self {
        match policy {
            SlashPolicy::Preserve => Self::Preserve,
            SlashPolicy::Force => Self::Force,
            SlashPolicy::Strip => Self::Strip,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Key {
            local,
            dest_prefix,
            root,
            prepend_bucket,
            leading_slash,
        } => {
            let bucket = if prepend_bucket {
                Some(match cli.bucket {
                    Some(bucket) => bucket,
                    None => StoreConfig::from_env()?.bucket,
                })
            } else {
                None
            };
            let options = KeyOptions {
                prepend_bucket: bucket,
                leading_slash: leading_slash.into(),
            };
            let key = ostore_paths::to_object_key(&local, &dest_prefix, &root, &options)?;
            println!("{key}");
        }
        Commands::Store(command) => {
            let config = StoreConfig::from_env()?;
            log::debug!("{config:?}");
            let mut client = ObjectStoreClient::from_config(&config)?;
            if let Some(bucket) = cli.bucket {
                client = client.with_bucket(bucket);
            }
            run(command, client).await?;
        }
    }

    Ok(())
}

async fn run(
    command: StoreCommand,
    client: ObjectStoreClient,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        StoreCommand::Put {
            local,
            key,
            public,
            content_type,
        } => {
            let receipt = client
                .put(
                    &key,
                    &local,
                    &PutOptions {
                        public,
                        content_type,
                    },
                )
                .await?;
            println!(
                "{} -> s3://{}/{} ({})",
                local.display(),
                client.bucket(),
                receipt.key,
                receipt.etag.as_deref().unwrap_or("no ETag")
            );
        }
        StoreCommand::Get { key, local } => {
            let written = client.get(&key, &local).await?;
            println!("{} ({written} bytes)", local.display());
        }
        StoreCommand::Stat { key } => {
            let stat = client.stat(&key).await?;
            println!("{}", serde_json::to_string_pretty(&stat)?);
        }
        StoreCommand::Ls { prefix, recursive } => {
            let entries = client.list(&prefix, recursive).await?;
            for entry in &entries {
                if entry.is_prefix {
                    println!("{:>12}  {}", "PRE", entry.key);
                } else {
                    println!("{:>12}  {}", entry.size.unwrap_or(0), entry.key);
                }
            }
        }
        StoreCommand::Rm { key } => {
            client.delete(&key).await?;
            println!("Deleted s3://{}/{key}", client.bucket());
        }
        StoreCommand::RmPrefix { prefix } => {
            let count = client.delete_all(&prefix).await?;
            println!(
                "Deleted {count} object(s) under s3://{}/{prefix}",
                client.bucket()
            );
        }
        StoreCommand::Acl { key } => match client.public_permission(&key).await? {
            Some(permission) => println!("public: {permission}"),
            None => println!("private"),
        },
        StoreCommand::MakePublic { key } => {
            client.set_public_read(&key).await?;
            println!("s3://{}/{key} is now public-read", client.bucket());
        }
        StoreCommand::Presign {
            key,
            ttl,
            force_download,
        } => {
            let headers = force_download.then(|| client.force_download_headers(&key));
            let url = client.presign(&key, ttl, headers.as_ref()).await?;
            println!("{url}");
        }
        StoreCommand::Sync {
            src,
            dest_prefix,
            delete,
            public,
            verify,
        } => {
            let options = SyncOptions {
                delete_local: delete,
                public,
                change_detection: if verify {
                    ChangeDetection::Fingerprint
                } else {
                    ChangeDetection::Presence
                },
            };
            let stats = DirectorySync::new(client, src, dest_prefix)
                .with_options(options)
                .index()
                .await?
                .run()
                .await?;
            println!("{stats}");
        }
        StoreCommand::Verify { local, key } => {
            match client.verify_local(&key, &local).await? {
                Verification::Match { part_size: None } => println!("match"),
                Verification::Match {
                    part_size: Some(part_size),
                } => println!("match (part size {part_size})"),
                Verification::Mismatch => {
                    println!("mismatch");
                    std::process::exit(1);
                }
                Verification::Inconclusive { tried } => {
                    println!("inconclusive (tried part sizes {tried:?})");
                    std::process::exit(2);
                }
            }
        }
    }

    Ok(())
}
