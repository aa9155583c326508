use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use digitraffic_bridge::config_flow::{Form, TrafficMessagesInput, TrafficOptionsInput};
use digitraffic_bridge::weathercam::{catalog_from_raw, fetch_catalog};
use digitraffic_bridge::{
    ConfigEntry, ConfigEntryStore, ConfigFlow, DigitrafficApiClient, EntitySink,
    FlowResult, HomeAssistantAPI, Integration, MemorySink, OptionsFlow, Settings,
    WeathercamCatalog,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval_at, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "digitraffic_bridge")]
#[command(about = "Publishes Digitraffic traffic messages and weathercams to Home Assistant")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Poll every configured entry until interrupted (default)
    Run,

    /// Add a traffic message service
    AddTraffic {
        /// Municipality to follow, repeat for several; none follows all of Finland
        #[arg(short, long = "municipality")]
        municipalities: Vec<String>,

        /// Situation type (e.g. ROAD_WORK), repeat for several; none selects all
        #[arg(short = 't', long = "situation-type")]
        situation_types: Vec<String>,

        /// Service name, defaults to one derived from the selection
        #[arg(short, long)]
        name: Option<String>,

        /// Attach the raw API features to the count sensors
        #[arg(long)]
        include_raw_data: bool,
    },

    /// Add a weathercam, creating the weathercam service if needed
    AddWeathercam {
        #[arg(short, long)]
        municipality: String,

        /// Camera id, e.g. C01503
        #[arg(short, long)]
        camera: String,

        /// Preset id, repeat for several
        #[arg(short, long = "preset", required = true)]
        presets: Vec<String>,
    },

    /// Replace the selection of a traffic message service; its options are cleared
    Reconfigure {
        entry_id: String,

        #[arg(short, long = "municipality")]
        municipalities: Vec<String>,

        #[arg(short = 't', long = "situation-type")]
        situation_types: Vec<String>,

        #[arg(long)]
        include_raw_data: bool,
    },

    /// Override the municipalities and situation types of a traffic message service
    Options {
        entry_id: String,

        #[arg(short, long = "municipality")]
        municipalities: Vec<String>,

        #[arg(short = 't', long = "situation-type")]
        situation_types: Vec<String>,
    },

    /// List configured entries
    List,

    /// Remove a configured entry and its entities
    Remove { entry_id: String },

    /// Rebuild the static weathercam catalog from the Digitraffic API
    PreprocessWeathercams {
        /// Where to write the catalog, defaults to DIGITRAFFIC_WEATHERCAM_DATA
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also archive the raw station responses here
        #[arg(long)]
        raw_output: Option<PathBuf>,

        /// Build from previously archived raw responses instead of the API
        #[arg(long, conflicts_with = "raw_output")]
        from_raw: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&settings).await,
        Commands::AddTraffic {
            municipalities,
            situation_types,
            name,
            include_raw_data,
        } => add_traffic(
            &settings,
            TrafficMessagesInput {
                municipalities,
                situation_types,
                include_raw_data,
            },
            name,
        ),
        Commands::AddWeathercam {
            municipality,
            camera,
            presets,
        } => add_weathercam(&settings, municipality, camera, presets),
        Commands::Reconfigure {
            entry_id,
            municipalities,
            situation_types,
            include_raw_data,
        } => reconfigure(
            &settings,
            &entry_id,
            TrafficMessagesInput {
                municipalities,
                situation_types,
                include_raw_data,
            },
        ),
        Commands::Options {
            entry_id,
            municipalities,
            situation_types,
        } => options(
            &settings,
            &entry_id,
            TrafficOptionsInput {
                municipalities,
                situation_types,
            },
        ),
        Commands::List => list(&settings),
        Commands::Remove { entry_id } => remove(&settings, &entry_id).await,
        Commands::PreprocessWeathercams {
            output,
            raw_output,
            from_raw,
        } => preprocess_weathercams(&settings, output, raw_output, from_raw).await,
    }
}

fn make_sink(settings: &Settings, client: &reqwest::Client) -> Arc<dyn EntitySink> {
    if settings.ha_url.is_empty() {
        info!("HA_URL not set, entity states are only logged");
        Arc::new(MemorySink::new())
    } else {
        Arc::new(HomeAssistantAPI::with_endpoint(
            &settings.ha_url,
            &settings.ha_token,
            client.clone(),
        ))
    }
}

fn load_catalog_or_empty(settings: &Settings) -> WeathercamCatalog {
    match WeathercamCatalog::load(&settings.weathercam_data_path) {
        Ok(catalog) => catalog,
        Err(e) => {
            warn!("{e:#}; weathercams are unavailable");
            WeathercamCatalog::default()
        }
    }
}

async fn run(settings: &Settings) -> anyhow::Result<()> {
    info!("Starting Digitraffic bridge");
    settings.log();

    let mut store = ConfigEntryStore::open(&settings.entries_path)?;
    if store.entries().is_empty() {
        warn!("No config entries; add one with `add-traffic` or `add-weathercam`");
    }

    let client = reqwest::Client::new();
    let api = DigitrafficApiClient::with_base_url(client.clone(), &settings.api_url);
    let sink = make_sink(settings, &client);
    let catalog = Arc::new(load_catalog_or_empty(settings));

    let mut integration = Integration::new(Arc::new(api), client, sink, catalog)
        .with_poll_interval(settings.poll_interval)
        .with_per_message_sensors(settings.per_message_sensors);

    let mut pending = integration.setup_all(store.entries()).await;
    info!(
        "{} of {} config entries loaded",
        integration.loaded_entries().len(),
        store.entries().len()
    );

    // Entries whose first poll failed are retried on the poll interval
    let mut retry = interval_at(
        Instant::now() + settings.poll_interval,
        settings.poll_interval,
    );
    // Changes made with the CLI while running
    let mut reload = interval_at(
        Instant::now() + settings.entries_reload_interval,
        settings.entries_reload_interval,
    );
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("Failed to listen for shutdown signal")?;
                info!("Shutting down");
                break;
            }
            _ = reload.tick() => {
                match ConfigEntryStore::open(&settings.entries_path) {
                    Ok(reloaded) => store = reloaded,
                    Err(e) => {
                        warn!("Keeping the loaded entries: {e:#}");
                        continue;
                    }
                }
                pending.retain(|id| store.get(id).is_some());
                // Pending entries wait for the retry tick
                let ready: Vec<ConfigEntry> = store
                    .entries()
                    .iter()
                    .filter(|e| !pending.contains(&e.entry_id))
                    .cloned()
                    .collect();
                pending.extend(integration.sync_entries(&ready).await);
            }
            _ = retry.tick(), if !pending.is_empty() => {
                let retry_entries: Vec<ConfigEntry> = store
                    .entries()
                    .iter()
                    .filter(|e| pending.contains(&e.entry_id))
                    .cloned()
                    .collect();
                pending = integration.setup_all(&retry_entries).await;
            }
        }
    }

    integration.unload_all();
    Ok(())
}

/// Turns anything but an error-free form into an error describing what went wrong
fn expect_form(result: FlowResult, step_id: &str) -> anyhow::Result<Form> {
    match result {
        FlowResult::Form(form) if form.step_id == step_id && !form.has_errors() => Ok(form),
        FlowResult::Form(form) => {
            let mut message = form
                .errors
                .iter()
                .map(|(field, error)| format!("{field}: {error}"))
                .collect::<Vec<_>>()
                .join(", ");
            if let Some(existing) = form.description_placeholders.get("existing_service") {
                message.push_str(&format!(" (existing service '{existing}')"));
            }
            bail!("{} rejected: {message}", form.step_id)
        }
        FlowResult::Abort {
            reason,
            description_placeholders,
        } => bail!("Aborted: {reason} {description_placeholders:?}"),
        other => bail!("Unexpected flow result {other:?}"),
    }
}

fn add_traffic(
    settings: &Settings,
    input: TrafficMessagesInput,
    name: Option<String>,
) -> anyhow::Result<()> {
    let mut store = ConfigEntryStore::open(&settings.entries_path)?;
    let catalog = WeathercamCatalog::default();

    let entry = {
        let mut flow = ConfigFlow::new(&mut store, &catalog);
        let form = expect_form(flow.step_traffic_messages(Some(input))?, "traffic_messages_name")?;
        let name = name
            .or_else(|| {
                form.defaults
                    .get("service_name")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_default();
        match flow.step_traffic_messages_name(Some(name))? {
            FlowResult::CreateEntry { entry } => entry,
            other => return expect_form(other, "").map(|_| ()),
        }
    };

    println!("Created '{}' ({})", entry.title, entry.entry_id);
    store.add(entry)?;
    Ok(())
}

fn add_weathercam(
    settings: &Settings,
    municipality: String,
    camera: String,
    presets: Vec<String>,
) -> anyhow::Result<()> {
    let mut store = ConfigEntryStore::open(&settings.entries_path)?;
    let catalog = WeathercamCatalog::load(&settings.weathercam_data_path)?;
    let existing = store
        .entries()
        .iter()
        .find(|e| e.weathercam().is_some())
        .map(|e| e.entry_id.clone());

    let created = {
        let mut flow = ConfigFlow::new(&mut store, &catalog);
        match existing {
            Some(entry_id) => {
                expect_form(
                    flow.step_reconfigure(&entry_id, None)?,
                    "reconfigure_weathercam_municipality",
                )?;
                expect_form(
                    flow.step_reconfigure_weathercam_municipality(Some(municipality))?,
                    "reconfigure_weathercam_camera",
                )?;
                expect_form(
                    flow.step_reconfigure_weathercam_camera(Some(camera))?,
                    "reconfigure_weathercam_presets",
                )?;
                match flow.step_reconfigure_weathercam_presets(Some(presets))? {
                    FlowResult::Abort {
                        reason: "reconfigure_successful",
                        ..
                    } => None,
                    other => return expect_form(other, "").map(|_| ()),
                }
            }
            None => {
                expect_form(flow.step_weathercam(Some(municipality))?, "weathercam_select")?;
                expect_form(
                    flow.step_weathercam_select(Some(camera))?,
                    "weathercam_presets",
                )?;
                match flow.step_weathercam_presets(Some(presets))? {
                    FlowResult::CreateEntry { entry } => Some(entry),
                    other => return expect_form(other, "").map(|_| ()),
                }
            }
        }
    };

    match created {
        Some(entry) => {
            println!("Created '{}' ({})", entry.title, entry.entry_id);
            store.add(entry)?;
        }
        None => println!("Camera added to the weathercam service"),
    }
    Ok(())
}

fn list(settings: &Settings) -> anyhow::Result<()> {
    let store = ConfigEntryStore::open(&settings.entries_path)?;
    if store.entries().is_empty() {
        println!("No config entries");
    }
    for entry in store.entries() {
        println!("{}  {}", entry.entry_id, entry.title);
        if entry.traffic().is_some() {
            let municipalities = entry.effective_municipalities();
            println!(
                "    municipalities: {}",
                if municipalities.is_empty() {
                    "all".to_string()
                } else {
                    municipalities.join(", ")
                }
            );
            let types: Vec<&str> = entry
                .effective_situation_types()
                .iter()
                .map(|t| t.as_str())
                .collect();
            println!("    situation types: {}", types.join(", "));
        }
        if let Some(data) = entry.weathercam() {
            for camera in &data.cameras {
                println!(
                    "    {} {} ({}): {}",
                    camera.camera_id,
                    camera.camera_name,
                    camera.municipality,
                    camera.presets.join(", ")
                );
            }
        }
    }
    Ok(())
}

fn reconfigure(
    settings: &Settings,
    entry_id: &str,
    input: TrafficMessagesInput,
) -> anyhow::Result<()> {
    let mut store = ConfigEntryStore::open(&settings.entries_path)?;
    let catalog = WeathercamCatalog::default();
    if store.get(entry_id).is_some_and(|e| e.traffic().is_none()) {
        bail!("{entry_id} is a weathercam service; use add-weathercam to add cameras");
    }

    let mut flow = ConfigFlow::new(&mut store, &catalog);
    match flow.step_reconfigure(entry_id, Some(input))? {
        FlowResult::Abort {
            reason: "reconfigure_successful",
            ..
        } => {
            println!("Reconfigured {entry_id}");
            Ok(())
        }
        other => expect_form(other, "").map(|_| ()),
    }
}

fn options(settings: &Settings, entry_id: &str, input: TrafficOptionsInput) -> anyhow::Result<()> {
    let mut store = ConfigEntryStore::open(&settings.entries_path)?;
    let catalog = WeathercamCatalog::default();
    if store.get(entry_id).is_some_and(|e| e.traffic().is_none()) {
        bail!("{entry_id} is a weathercam service; its options are the camera presets");
    }

    let mut flow = OptionsFlow::new(&mut store, &catalog, entry_id);
    match flow.step_init(Some(input))? {
        FlowResult::UpdateEntry { entry_id } => {
            println!("Options of {entry_id} updated");
            Ok(())
        }
        other => expect_form(other, "").map(|_| ()),
    }
}

async fn remove(settings: &Settings, entry_id: &str) -> anyhow::Result<()> {
    let mut store = ConfigEntryStore::open(&settings.entries_path)?;
    let entry = store.remove(entry_id)?;
    println!("Removed '{}' ({})", entry.title, entry.entry_id);

    if !settings.ha_url.is_empty() {
        let ha = HomeAssistantAPI::with_endpoint(
            &settings.ha_url,
            &settings.ha_token,
            reqwest::Client::new(),
        );
        let removed = ha.remove_entry_states(&entry.entry_id).await?;
        println!("Removed {} entities from Home Assistant", removed.len());
    }
    Ok(())
}

async fn preprocess_weathercams(
    settings: &Settings,
    output: Option<PathBuf>,
    raw_output: Option<PathBuf>,
    from_raw: Option<PathBuf>,
) -> anyhow::Result<()> {
    let (catalog, failed) = match from_raw {
        Some(raw_path) => {
            let contents = std::fs::read_to_string(&raw_path)
                .with_context(|| format!("Failed to read {}", raw_path.display()))?;
            let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(&contents)?;
            catalog_from_raw(&raw)
        }
        None => {
            let api = DigitrafficApiClient::with_base_url(reqwest::Client::new(), &settings.api_url);
            let (catalog, raw, failed) = fetch_catalog(&api).await?;
            if let Some(raw_output) = raw_output {
                std::fs::write(&raw_output, serde_json::to_string_pretty(&raw)?)
                    .with_context(|| format!("Failed to write {}", raw_output.display()))?;
                info!("Raw station data written to {}", raw_output.display());
            }
            (catalog, failed)
        }
    };

    let output = output.unwrap_or_else(|| settings.weathercam_data_path.clone());
    catalog.save(&output)?;

    println!("Weathercam catalog written to {}", output.display());
    println!("  Cameras: {}", catalog.len());
    for (municipality, cameras) in catalog.summary() {
        println!("  {municipality}: {cameras}");
    }
    if !failed.is_empty() {
        println!("  Failed: {}", failed.join(", "));
    }
    Ok(())
}
