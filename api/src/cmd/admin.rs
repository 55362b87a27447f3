use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use pixrefiner_api::{
    auth::AuthConfig,
    config::{LIBRARY_FILE, OPTIONS_FILE},
    refiner::{Refiner, UploadDescriptor},
    routes::NONCE_ACTIONS,
};
use pixrefiner_convert::{mime_for_extension, NativeEditor};
use pixrefiner_store::{AttachmentId, ConversionLog, MediaLibrary, Options, SettingName, Settings};
use serde_json::Value;

#[derive(Debug, Args)]
pub struct AdminArgs {
    /// Where settings, the conversion log and the media library are kept.
    #[clap(long, env, default_value = "data")]
    data_dir: PathBuf,

    #[clap(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Convert the next batch of existing attachments
    ConvertBatch {
        #[clap(long, default_value_t = 0)]
        offset: usize,
        /// Keep going until every candidate has been tried
        #[clap(long)]
        all: bool,
    },
    /// Convert a single file in place, outside the media library
    Convert {
        file: PathBuf,
    },
    /// Show how much of the library has been converted
    Status,
    /// Print the conversion log
    Log {
        /// Clear the log instead of printing it
        #[clap(long)]
        clear: bool,
    },
    /// Show the current settings
    Settings,
    /// Change one setting. The value is parsed as JSON, falling back to a plain string.
    Set { name: String, value: String },
    /// Restore every setting to its default
    ResetDefaults,
    /// Exclude an attachment from conversion
    Exclude { id: AttachmentId },
    /// Remove an attachment from the exclusion list
    Include { id: AttachmentId },
    /// Print the nonce for an admin action
    Nonce {
        action: String,
        #[clap(long, env)]
        nonce_secret: String,
    },
}

struct Stores {
    options: Options,
    library: MediaLibrary,
    editor: NativeEditor,
}

impl Stores {
    fn open(data_dir: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Stores {
            options: Options::open(data_dir.join(OPTIONS_FILE))?,
            library: MediaLibrary::open(data_dir.join(LIBRARY_FILE))?,
            editor: NativeEditor::new(),
        })
    }

    fn refiner(&self) -> Refiner<'_> {
        Refiner::new(&self.options, &self.library, &self.editor)
    }

    fn settings(&self) -> Settings<'_> {
        Settings::new(&self.options)
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn admin_commands(cmd: AdminArgs) -> Result<()> {
    // Nonces only need the secret, so don't create a data directory for them.
    match cmd.commands {
        Commands::Nonce {
            action,
            nonce_secret,
        } => print_nonce(&action, &nonce_secret),
        commands => run_with_stores(&Stores::open(&cmd.data_dir)?, commands),
    }
}

fn print_nonce(action: &str, nonce_secret: &str) -> Result<()> {
    if !NONCE_ACTIONS.contains(&action) {
        return Err(anyhow!("Unknown action {action}"));
    }
    println!("{}", AuthConfig::new(nonce_secret).nonce(action));
    Ok(())
}

fn run_with_stores(stores: &Stores, commands: Commands) -> Result<()> {
    match commands {
        Commands::ConvertBatch { offset, all } => convert_batch(stores, offset, all)?,
        Commands::Convert { file } => convert_file(stores, file)?,
        Commands::Status => print_json(&stores.refiner().status()?)?,
        Commands::Log { clear: true } => ConversionLog::new(&stores.options).clear()?,
        Commands::Log { clear: false } => {
            for line in ConversionLog::new(&stores.options).entries() {
                println!("{line}");
            }
        }
        Commands::Settings => print_json(&stores.settings().load())?,
        Commands::Set { name, value } => {
            let name = name.parse::<SettingName>()?;
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            stores.settings().set_from_value(name, &value)?;
            print_json(&stores.settings().load())?;
        }
        Commands::ResetDefaults => {
            stores.settings().reset_defaults()?;
            print_json(&stores.settings().load())?;
        }
        Commands::Exclude { id } => {
            if !stores.settings().exclude(id)? {
                println!("Attachment {id} was already excluded");
            }
        }
        Commands::Include { id } => {
            if !stores.settings().include(id)? {
                println!("Attachment {id} was not excluded");
            }
        }
        Commands::Nonce {
            action,
            nonce_secret,
        } => print_nonce(&action, &nonce_secret)?,
    }

    Ok(())
}

fn convert_batch(stores: &Stores, mut offset: usize, all: bool) -> Result<()> {
    loop {
        let report = stores.refiner().convert_batch(offset)?;
        println!(
            "converted {}, skipped {}, failed {}, {} remaining",
            report.converted, report.skipped, report.failed, report.remaining
        );

        if report.complete || !all || report.items.is_empty() {
            return Ok(());
        }
        offset = report.next_offset;
    }
}

fn convert_file(stores: &Stores, file: PathBuf) -> Result<()> {
    let file = file.canonicalize()?;
    let extension = file
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    let mime_type = mime_for_extension(&extension)
        .ok_or_else(|| anyhow!("{} is not an image", file.display()))?;
    let url = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let upload = UploadDescriptor {
        file,
        url,
        mime_type: mime_type.to_string(),
    };
    let result = stores.refiner().handle_upload(upload, None);
    print_json(&result)
}
