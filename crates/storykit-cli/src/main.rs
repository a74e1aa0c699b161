use std::io::{self, BufRead, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use storykit_contracts::commands::{parse_intent, Intent, STUDIO_HELP_COMMANDS};
use storykit_contracts::events::{read_events, EventKind, EventWriter};
use storykit_contracts::runs::session::{ImageSource, Session};
use storykit_contracts::story::catalog::{scan_catalog, Catalog, CatalogImage};
use storykit_contracts::story::prompts::story_prompt;
use storykit_engine::replicate::PredictionApi;
use storykit_engine::studio::{AppliedEdit, ApplyRequest, EditSource, ModelChoice, StoryImage};
use storykit_engine::{
    check_image_file, write_stitched, ReplicateClient, StoryStudio, StudioConfig, StudioError,
};

const SESSION_FILE: &str = "session.json";
const EVENTS_FILE: &str = "events.jsonl";
const RECEIPTS_DIR: &str = "receipts";

#[derive(Debug, Parser)]
#[command(
    name = "storykit",
    version,
    about = "Instagram story generator over Replicate"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the story models and products in the image directory.
    Catalog(CatalogArgs),
    /// Stitch a story and a product side by side.
    Stitch(StitchArgs),
    /// Stitch, then generate a story image.
    Generate(GenerateArgs),
    /// Describe the text blocks of the current story image.
    Analyze(AnalyzeArgs),
    /// Rewrite text on the current story image.
    Apply(ApplyArgs),
    /// List or select story versions.
    Versions(VersionsArgs),
    /// Download the current story image.
    Save(SaveArgs),
    /// Interactive studio loop.
    Studio(StudioArgs),
}

#[derive(Debug, Args)]
struct ModelArgs {
    #[arg(long)]
    vision_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
    #[arg(long)]
    edit_model: Option<String>,
}

impl ModelArgs {
    fn choice(&self) -> ModelChoice {
        ModelChoice {
            vision: self.vision_model.clone(),
            generate: self.image_model.clone(),
            edit: self.edit_model.clone(),
        }
    }
}

#[derive(Debug, Parser)]
struct CatalogArgs {
    #[arg(long)]
    images: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct StitchArgs {
    /// Image path, or a catalog story model (file name or 1-based index).
    #[arg(long)]
    story: String,
    /// Image path, or a catalog product (file name or 1-based index).
    #[arg(long)]
    product: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    images: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    story: String,
    #[arg(long)]
    product: String,
    /// Full generation prompt; replaces the default one.
    #[arg(long)]
    prompt: Option<String>,
    /// Product description substituted into the default prompt.
    #[arg(long)]
    caption: Option<String>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    images: Option<PathBuf>,
    #[command(flatten)]
    models: ModelArgs,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[arg(long)]
    out: PathBuf,
    /// Analyze this URL instead of the current version. The next apply edits it.
    #[arg(long)]
    image_url: Option<String>,
    #[command(flatten)]
    models: ModelArgs,
}

#[derive(Debug, Parser)]
struct ApplyArgs {
    #[arg(long)]
    out: PathBuf,
    /// Custom edit instruction; overrides the analysis edits.
    #[arg(long)]
    prompt: Option<String>,
    /// Edit this local image instead of the current version.
    #[arg(long)]
    image: Option<PathBuf>,
    /// Text block edit, `N=TEXT` with N 1-based. Repeatable.
    #[arg(long = "edit", value_name = "N=TEXT")]
    edits: Vec<String>,
    #[command(flatten)]
    models: ModelArgs,
}

#[derive(Debug, Parser)]
struct VersionsArgs {
    #[arg(long)]
    out: PathBuf,
    /// Make version N (1-based) current.
    #[arg(long)]
    select: Option<usize>,
}

#[derive(Debug, Parser)]
struct SaveArgs {
    #[arg(long)]
    out: PathBuf,
    /// Destination file or directory. Defaults to the output directory.
    #[arg(long)]
    to: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct StudioArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    images: Option<PathBuf>,
    #[command(flatten)]
    models: ModelArgs,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("storykit error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = StudioConfig::from_env();
    match cli.command {
        Command::Catalog(args) => run_catalog(args, &config),
        Command::Stitch(args) => run_stitch(args, &config),
        Command::Generate(args) => run_generate(args, config),
        Command::Analyze(args) => run_analyze(args, config),
        Command::Apply(args) => run_apply(args, config),
        Command::Versions(args) => run_versions(args),
        Command::Save(args) => run_save(args, config),
        Command::Studio(args) => {
            run_studio(args, config)?;
            Ok(0)
        }
    }
}

/// Everything one command needs: the persisted session, the studio
/// operations and the session's event log.
struct Workspace<A: PredictionApi> {
    out_dir: PathBuf,
    session: Session,
    studio: StoryStudio<A>,
    events: EventWriter,
    catalog: Catalog,
}

impl<A: PredictionApi> Workspace<A> {
    fn new(out_dir: &Path, api: A, config: StudioConfig, models: ModelChoice) -> Self {
        let session = Session::load(out_dir.join(SESSION_FILE));
        let events = EventWriter::new(out_dir.join(EVENTS_FILE), session.session_id.clone());
        let catalog = load_catalog(&config.images_dir);
        let studio = StoryStudio::new(api, config)
            .with_models(models)
            .with_events(events.clone())
            .with_receipts_dir(out_dir.join(RECEIPTS_DIR));
        Self {
            out_dir: out_dir.to_path_buf(),
            session,
            studio,
            events,
            catalog,
        }
    }

    fn emit(&self, kind: EventKind, payload: Value) {
        let payload = payload.as_object().cloned().unwrap_or_default();
        if let Err(err) = self.events.emit(kind, payload) {
            log::warn!("failed to record {} event: {err:#}", kind.as_str());
        }
    }

    /// Runs `action` and keeps the outcome in the session file either way.
    fn track<T>(&mut self, action: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = action(self);
        if let Err(err) = &result {
            self.session.set_error(format!("{err:#}"));
        }
        self.session
            .save()
            .with_context(|| format!("failed to save {}", self.session.path.display()))?;
        result
    }

    fn set_story(&mut self, key: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            bail!("a story image path or catalog entry is required");
        }
        let path = PathBuf::from(key);
        if path.is_file() {
            check_image_file(&path).context("Please upload an image file")?;
            let from_catalog = self
                .catalog
                .story_models
                .iter()
                .any(|item| item.path == path);
            if from_catalog {
                self.session.select_story_model(path.clone());
            } else {
                self.session.upload_story(path.clone());
            }
        } else if let Some(item) = self.catalog.find_story_model(key) {
            let item_path = item.path.clone();
            self.session.select_story_model(item_path);
        } else {
            bail!("story image not found: {key}");
        }
        self.emit_selection("story");
        Ok(())
    }

    fn set_product(&mut self, key: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            bail!("a product image path or catalog entry is required");
        }
        let path = PathBuf::from(key);
        let item: Option<CatalogImage> = if path.is_file() {
            check_image_file(&path).context("Please upload an image file")?;
            self.catalog.product_for_path(&path).cloned()
        } else {
            let Some(item) = self.catalog.find_product(key) else {
                bail!("product image not found: {key}");
            };
            Some(item.clone())
        };
        match item {
            Some(item) => self.session.select_product(&item),
            None => self.session.upload_product(path),
        }
        self.emit_selection("product");
        Ok(())
    }

    fn emit_selection(&self, slot: &str) {
        let source = match slot {
            "story" => self.session.story.as_ref(),
            _ => self.session.product.as_ref(),
        };
        self.emit(
            EventKind::ImageSelected,
            json!({
                "slot": slot,
                "source": source.map(|source| source.label()),
                "path": source.map(|source| source.path().to_string_lossy().to_string()),
                "caption": self.session.product_caption,
            }),
        );
    }

    fn stitch(&mut self) -> Result<PathBuf> {
        let (Some(story), Some(product)) = (&self.session.story, &self.session.product) else {
            return Err(StudioError::MissingInput("Select a story model and a product first").into());
        };
        let path = write_stitched(story.path(), product.path(), &self.out_dir)?;
        self.session.set_stitched(path.clone());
        self.emit(
            EventKind::ImagesStitched,
            json!({"path": path.to_string_lossy().to_string()}),
        );
        Ok(path)
    }

    fn generate(&mut self) -> Result<StoryImage> {
        let Some(stitched) = self.session.stitched_path.clone() else {
            return Err(StudioError::MissingInput("Stitch the images first").into());
        };
        let prompt = self.session.prompt.clone();
        let image = self.studio.generate_story(&stitched, &prompt)?;
        self.session.record_generation(image.image_url.clone(), &prompt);
        Ok(image)
    }

    fn analyze(&mut self, image_url: Option<&str>) -> Result<()> {
        let url = match image_url.map(str::trim).filter(|value| !value.is_empty()) {
            Some(url) => url.to_string(),
            None => self
                .session
                .generated_url
                .clone()
                .ok_or(StudioError::MissingInput("Generate a story first"))?,
        };
        let analysis = self.studio.analyze_story_text(&url)?;
        let blocks = analysis.text_blocks().map(<[_]>::len);
        self.session.set_analysis(url.clone(), analysis);
        self.emit(
            EventKind::AnalysisReady,
            json!({"image_url": url, "text_blocks": blocks}),
        );
        Ok(())
    }

    fn apply(&mut self) -> Result<AppliedEdit> {
        let source = match (&self.session.custom_edit_image, self.session.edit_image_url()) {
            (Some(path), _) => EditSource::File(path.clone()),
            (None, Some(url)) => EditSource::Url(url.to_string()),
            (None, None) => return Err(StudioError::MissingInput("No image provided").into()),
        };
        let edit = self.studio.apply_changes(ApplyRequest {
            source,
            analysis: self.session.analysis.as_ref(),
            custom_prompt: self.session.apply_prompt(),
        })?;
        let version = self
            .session
            .record_edit(edit.image.image_url.clone(), &edit.prompt)
            .version_id
            .clone();
        self.emit(
            EventKind::VersionCreated,
            json!({"version_id": version, "image_url": edit.image.image_url}),
        );
        Ok(edit)
    }

    fn save_story(&mut self, dest: Option<&Path>) -> Result<PathBuf> {
        let Some(url) = self.session.generated_url.clone() else {
            return Err(StudioError::MissingInput("Generate a story first").into());
        };
        let dest = dest.map(Path::to_path_buf).unwrap_or_else(|| self.out_dir.clone());
        self.studio.save_story(&url, &dest)
    }
}

fn open_workspace(
    out_dir: &Path,
    config: StudioConfig,
    models: ModelChoice,
) -> Result<Workspace<ReplicateClient>> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let client = ReplicateClient::new(&config)?;
    Ok(Workspace::new(out_dir, client, config, models))
}

fn load_catalog(dir: &Path) -> Catalog {
    if !dir.is_dir() {
        return Catalog::default();
    }
    match scan_catalog(dir) {
        Ok(catalog) => catalog,
        Err(err) => {
            log::warn!("{err:#}");
            Catalog::default()
        }
    }
}

fn run_catalog(args: CatalogArgs, config: &StudioConfig) -> Result<i32> {
    let dir = args.images.unwrap_or_else(|| config.images_dir.clone());
    let catalog = scan_catalog(&dir)?;
    print!("{}", render_catalog(&catalog));
    Ok(0)
}

fn run_stitch(args: StitchArgs, config: &StudioConfig) -> Result<i32> {
    let mut config = config.clone();
    if let Some(images) = args.images {
        config.images_dir = images;
    }
    let mut workspace = open_workspace(&args.out, config, ModelChoice::default())?;
    let path = workspace.track(|ws| {
        ws.set_story(&args.story)?;
        ws.set_product(&args.product)?;
        ws.stitch()
    })?;
    println!("{}", path.display());
    Ok(0)
}

fn run_generate(args: GenerateArgs, mut config: StudioConfig) -> Result<i32> {
    if let Some(images) = args.images.clone() {
        config.images_dir = images;
    }
    let mut workspace = open_workspace(&args.out, config, args.models.choice())?;
    let image = workspace.track(|ws| {
        ws.set_story(&args.story)?;
        ws.set_product(&args.product)?;
        if let Some(caption) = args.caption.as_deref() {
            ws.session.set_prompt(story_prompt(Some(caption)));
        }
        if let Some(prompt) = args.prompt.as_deref() {
            ws.session.set_prompt(prompt);
        }
        ws.stitch()?;
        ws.generate()
    })?;
    println!("{}", image.image_url);
    Ok(0)
}

fn run_analyze(args: AnalyzeArgs, config: StudioConfig) -> Result<i32> {
    let mut workspace = open_workspace(&args.out, config, args.models.choice())?;
    workspace.track(|ws| ws.analyze(args.image_url.as_deref()))?;
    print!("{}", render_analysis(&workspace.session));
    Ok(0)
}

fn run_apply(args: ApplyArgs, config: StudioConfig) -> Result<i32> {
    let edits = args
        .edits
        .iter()
        .map(|raw| parse_block_edit(raw))
        .collect::<Result<Vec<_>>>()?;
    let mut workspace = open_workspace(&args.out, config, args.models.choice())?;
    let edit = workspace.track(|ws| {
        for (index, text) in &edits {
            ws.session.edit_block(*index, text)?;
        }
        if let Some(image) = &args.image {
            check_image_file(image).context("Please upload an image file")?;
            ws.session.set_custom_edit_image(Some(image.clone()));
        }
        if let Some(prompt) = args.prompt.as_deref() {
            ws.session.set_edit_prompt(prompt);
        }
        ws.apply()
    })?;
    println!("{}", edit.image.image_url);
    Ok(0)
}

fn run_versions(args: VersionsArgs) -> Result<i32> {
    let mut session = Session::load(args.out.join(SESSION_FILE));
    if let Some(position) = args.select {
        let Some(index) = position.checked_sub(1) else {
            bail!("versions are numbered from 1");
        };
        session.select_version(index)?;
        session.save()?;
    }
    print!("{}", render_versions(&session));
    Ok(0)
}

fn run_save(args: SaveArgs, config: StudioConfig) -> Result<i32> {
    let mut workspace = open_workspace(&args.out, config, ModelChoice::default())?;
    let saved = workspace.track(|ws| ws.save_story(args.to.as_deref()))?;
    println!("{}", saved.display());
    Ok(0)
}

fn run_studio(args: StudioArgs, mut config: StudioConfig) -> Result<()> {
    if let Some(images) = args.images.clone() {
        config.images_dir = images;
    }
    let mut workspace = open_workspace(&args.out, config, args.models.choice())?;
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    studio_loop(&mut workspace, stdin.lock(), &mut stdout)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

fn studio_loop<A: PredictionApi>(
    workspace: &mut Workspace<A>,
    mut input: impl BufRead,
    out: &mut impl Write,
) -> Result<()> {
    writeln!(out, "Story studio started. Type /help for commands.")?;
    let mut line = String::new();
    loop {
        write!(out, "> ")?;
        out.flush()?;
        line.clear();
        let read = match input.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }
        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        if intent.action == "noop" {
            continue;
        }
        let mut message = Vec::new();
        let result = workspace.track(|ws| handle_intent(ws, &intent, &mut message));
        out.write_all(&message)?;
        match result {
            Ok(Flow::Quit) => break,
            Ok(Flow::Continue) => {}
            Err(err) => writeln!(out, "Error: {err:#}")?,
        }
    }
    Ok(())
}

fn handle_intent<A: PredictionApi>(
    ws: &mut Workspace<A>,
    intent: &Intent,
    out: &mut impl Write,
) -> Result<Flow> {
    match intent.action.as_str() {
        "help" => writeln!(out, "Commands: {}", STUDIO_HELP_COMMANDS.join(" "))?,
        "quit" => return Ok(Flow::Quit),
        "catalog" => write!(out, "{}", render_catalog(&ws.catalog))?,
        "status" => {
            let last_event = read_events(ws.events.path())
                .map_err(|err| log::warn!("{err:#}"))
                .ok()
                .and_then(|events| events.last().cloned());
            write!(out, "{}", render_status(&ws.session, last_event.as_ref()))?;
        }
        "select_story_model" => {
            let key = required_arg(intent, "key", "/story_model <n|file>")?;
            let Some(item) = ws.catalog.find_story_model(&key).cloned() else {
                bail!("no story model matches {key}");
            };
            ws.session.select_story_model(item.path.clone());
            ws.emit_selection("story");
            writeln!(out, "Story model: {}", item.filename)?;
        }
        "upload_story" => {
            let path = required_arg(intent, "path", "/story <path>")?;
            ws.set_story(&path)?;
            writeln!(out, "Story image: {path}")?;
        }
        "clear_story" => {
            ws.session.clear_story();
            writeln!(out, "Story image cleared")?;
        }
        "select_product" => {
            let key = required_arg(intent, "key", "/product_item <n|file>")?;
            let Some(item) = ws.catalog.find_product(&key).cloned() else {
                bail!("no product matches {key}");
            };
            ws.session.select_product(&item);
            ws.emit_selection("product");
            writeln!(out, "Product: {} ({})", item.filename, item.caption)?;
        }
        "upload_product" => {
            let path = required_arg(intent, "path", "/product <path>")?;
            ws.set_product(&path)?;
            writeln!(out, "Product image: {path}")?;
        }
        "clear_product" => {
            ws.session.clear_product();
            writeln!(out, "Product image cleared")?;
        }
        "set_prompt" => {
            let prompt = intent
                .prompt
                .clone()
                .or_else(|| intent.arg_str("text").map(str::to_string))
                .unwrap_or_default();
            if prompt.trim().is_empty() {
                writeln!(out, "Prompt: {}", ws.session.prompt)?;
            } else {
                ws.session.set_prompt(prompt);
                writeln!(out, "Prompt updated")?;
            }
        }
        "stitch" => {
            let path = ws.stitch()?;
            writeln!(out, "Stitched: {}", path.display())?;
        }
        "generate" => {
            writeln!(out, "Generating... this can take up to a few minutes")?;
            let image = ws.generate()?;
            writeln!(out, "Generated: {}", image.image_url)?;
        }
        "analyze" => {
            ws.analyze(None)?;
            write!(out, "{}", render_analysis(&ws.session))?;
        }
        "edit_block" => {
            let Some(index) = intent.arg_index("index") else {
                bail!("usage: /edit <n> [text]");
            };
            match intent.arg_str("text") {
                Some(text) => {
                    ws.session.edit_block(index, text)?;
                    writeln!(out, "Block {} -> {text}", index + 1)?;
                }
                None => {
                    let current = ws
                        .session
                        .analysis
                        .as_ref()
                        .and_then(|analysis| analysis.editable_text(index));
                    match current {
                        Some(text) => writeln!(out, "Block {}: {text}", index + 1)?,
                        None => bail!("no text block {}", index + 1),
                    }
                }
            }
        }
        "set_edit_prompt" => {
            let text = intent.arg_str("text").unwrap_or_default();
            ws.session.set_edit_prompt(text);
            writeln!(out, "Edit prompt updated")?;
        }
        "set_edit_image" => {
            let path = PathBuf::from(required_arg(intent, "path", "/edit_image <path>")?);
            check_image_file(&path).context("Please upload an image file")?;
            writeln!(out, "Edit image: {}", path.display())?;
            ws.session.set_custom_edit_image(Some(path));
        }
        "clear_edit_image" => {
            ws.session.set_custom_edit_image(None);
            writeln!(out, "Edit image cleared")?;
        }
        "apply" => {
            writeln!(out, "Applying changes...")?;
            let edit = ws.apply()?;
            writeln!(
                out,
                "Version {}: {}",
                ws.session.versions.len(),
                edit.image.image_url
            )?;
        }
        "list_versions" => write!(out, "{}", render_versions(&ws.session))?,
        "select_version" => {
            let Some(index) = intent.arg_index("index") else {
                bail!("usage: /version <n>");
            };
            let version = ws.session.select_version(index)?;
            writeln!(out, "Current version: {}", version.version_id)?;
        }
        "save" => {
            let dest = intent
                .arg_str("path")
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from);
            let saved = ws.save_story(dest.as_deref())?;
            writeln!(out, "Saved: {}", saved.display())?;
        }
        "invalid" => {
            writeln!(out, "{}", intent.arg_str("reason").unwrap_or("invalid command"))?;
        }
        "unknown" => {
            let command = intent.arg_str("command").unwrap_or_default();
            writeln!(out, "Unknown command: /{command}. Type /help for commands.")?;
        }
        other => writeln!(out, "Unhandled action: {other}")?,
    }
    Ok(Flow::Continue)
}

fn required_arg(intent: &Intent, key: &str, usage: &str) -> Result<String> {
    value_as_non_empty_string(intent.command_args.get(key))
        .ok_or_else(|| anyhow::anyhow!("usage: {usage}"))
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    let raw = value
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

/// Parses `N=TEXT` into a 0-based block index and its replacement text.
fn parse_block_edit(raw: &str) -> Result<(usize, String)> {
    let Some((position, text)) = raw.split_once('=') else {
        bail!("invalid --edit {raw:?}: expected N=TEXT");
    };
    let index = position
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|value| value.checked_sub(1))
        .with_context(|| format!("invalid --edit {raw:?}: N starts at 1"))?;
    Ok((index, text.to_string()))
}

fn render_catalog(catalog: &Catalog) -> String {
    let mut text = String::new();
    for (title, items) in [
        ("Story models", &catalog.story_models),
        ("Products", &catalog.products),
    ] {
        text.push_str(&format!("{title}:\n"));
        if items.is_empty() {
            text.push_str("  (none)\n");
        }
        for (idx, item) in items.iter().enumerate() {
            text.push_str(&format!("  {}. {} - {}\n", idx + 1, item.filename, item.caption));
        }
    }
    text
}

fn render_analysis(session: &Session) -> String {
    let Some(analysis) = session.analysis.as_ref() else {
        return "No analysis yet\n".to_string();
    };
    let Some(blocks) = analysis.text_blocks() else {
        let raw = serde_json::to_string_pretty(analysis).unwrap_or_default();
        return format!("No text blocks found. Raw response:\n{raw}\n");
    };
    let mut text = String::new();
    for (idx, block) in blocks.iter().enumerate() {
        let kind = block.kind.as_deref().unwrap_or("Text");
        let mut details = Vec::new();
        if let Some(typeface) = block.typeface.as_deref() {
            details.push(typeface);
        }
        if let Some(color) = block.color.as_deref() {
            details.push(color);
        }
        let shown = block.new_content.as_deref().unwrap_or(&block.content);
        text.push_str(&format!("  {}. [{kind}] {shown}", idx + 1));
        if !details.is_empty() {
            text.push_str(&format!(" ({})", details.join(", ")));
        }
        if block.is_changed() {
            text.push_str(" *");
        }
        text.push('\n');
    }
    text
}

fn render_versions(session: &Session) -> String {
    if session.versions.is_empty() {
        return "No versions yet\n".to_string();
    }
    let mut text = String::new();
    for (idx, version) in session.versions.iter().enumerate() {
        let marker = if idx == session.current_version { "*" } else { " " };
        text.push_str(&format!(
            "{marker} {}. {} {} {}\n",
            idx + 1,
            version.version_id,
            version.operation,
            version.image_url
        ));
    }
    text
}

fn render_status(session: &Session, last_event: Option<&Value>) -> String {
    let describe = |source: Option<&ImageSource>| {
        source
            .map(|source| format!("{} ({})", source.path().display(), source.label()))
            .unwrap_or_else(|| "-".to_string())
    };
    let mut rows: Vec<(&str, String)> = vec![
        ("story", describe(session.story.as_ref())),
        ("product", describe(session.product.as_ref())),
        (
            "caption",
            session.product_caption.clone().unwrap_or_else(|| "-".to_string()),
        ),
        (
            "stitched",
            session
                .stitched_path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
        (
            "story image",
            session.generated_url.clone().unwrap_or_else(|| "-".to_string()),
        ),
        ("versions", session.versions.len().to_string()),
    ];
    if let Some(path) = &session.custom_edit_image {
        rows.push(("edit image", path.display().to_string()));
    }
    if let Some(error) = &session.last_error {
        rows.push(("last error", error.clone()));
    }
    if let Some(kind) = last_event.and_then(|event| event["type"].as_str()) {
        rows.push(("last event", kind.to_string()));
    }
    let mut text = String::new();
    for (key, value) in rows {
        text.push_str(&format!("{key:>12}: {value}\n"));
    }
    text
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::Cursor;

    use anyhow::anyhow;
    use image::{Rgb, RgbImage};
    use serde_json::Map;
    use storykit_engine::poll::PollPolicy;
    use storykit_engine::replicate::{Prediction, PredictionStatus, PredictionTarget, UploadFile};

    use super::*;

    /// Every prediction succeeds immediately with a numbered image URL.
    #[derive(Default)]
    struct InstantApi {
        created: RefCell<u32>,
        inputs: RefCell<Vec<Map<String, Value>>>,
        analysis: String,
    }

    impl PredictionApi for InstantApi {
        fn upload_file(&self, file: UploadFile) -> Result<String> {
            Ok(format!("https://replicate.delivery/uploads/{}", file.filename))
        }

        fn latest_version(&self, _model: &str) -> Result<String> {
            Ok("flux-latest".to_string())
        }

        fn create_prediction(
            &self,
            target: &PredictionTarget,
            input: &Map<String, Value>,
        ) -> Result<Prediction> {
            self.inputs.borrow_mut().push(input.clone());
            *self.created.borrow_mut() += 1;
            let count = *self.created.borrow();
            let output = match target {
                PredictionTarget::Model(_) => json!([self.analysis]),
                PredictionTarget::Version(_) => {
                    json!(format!("https://replicate.delivery/out-{count}.jpg"))
                }
            };
            Ok(Prediction {
                id: format!("pred-{count}"),
                status: PredictionStatus::Succeeded,
                output,
                error: Value::Null,
            })
        }

        fn get_prediction(&self, id: &str) -> Result<Prediction> {
            Err(anyhow!("unexpected poll for {id}"))
        }

        fn download(&self, _url: &str) -> Result<Vec<u8>> {
            Ok(b"story".to_vec())
        }
    }

    fn config(images_dir: &Path) -> StudioConfig {
        StudioConfig {
            replicate_token: Some("r8_test".to_string()),
            openai_api_key: Some("sk-test".to_string()),
            images_dir: images_dir.to_path_buf(),
            poll: PollPolicy {
                max_attempts: 2,
                interval: std::time::Duration::ZERO,
            },
            ..StudioConfig::default()
        }
    }

    fn write_png(path: &Path, color: [u8; 3]) -> Result<()> {
        let mut image = RgbImage::new(12, 20);
        for pixel in image.pixels_mut() {
            *pixel = Rgb(color);
        }
        image.save(path)?;
        Ok(())
    }

    fn catalog_dir(root: &Path) -> Result<PathBuf> {
        let dir = root.join("img");
        std::fs::create_dir_all(&dir)?;
        write_png(&dir.join("story_model_1.png"), [200, 30, 30])?;
        write_png(&dir.join("product_1.png"), [30, 30, 200])?;
        Ok(dir)
    }

    fn workspace(root: &Path, api: InstantApi) -> Result<Workspace<InstantApi>> {
        let images = catalog_dir(root)?;
        let out = root.join("out");
        std::fs::create_dir_all(&out)?;
        Ok(Workspace::new(&out, api, config(&images), ModelChoice::default()))
    }

    fn run_lines(ws: &mut Workspace<InstantApi>, lines: &str) -> Result<String> {
        let mut out = Vec::new();
        studio_loop(ws, Cursor::new(lines.to_string()), &mut out)?;
        Ok(String::from_utf8(out)?)
    }

    #[test]
    fn parse_block_edit_accepts_one_based_positions() -> Result<()> {
        assert_eq!(parse_block_edit("2=Shop now")?, (1, "Shop now".to_string()));
        assert_eq!(parse_block_edit("1=a=b")?, (0, "a=b".to_string()));
        assert!(parse_block_edit("0=x").is_err());
        assert!(parse_block_edit("title").is_err());
        Ok(())
    }

    #[test]
    fn studio_loop_runs_the_full_flow() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let api = InstantApi {
            analysis: r#"{"textBlocks": [{"type": "Title", "content": "New Car!"}]}"#.to_string(),
            ..InstantApi::default()
        };
        let mut ws = workspace(temp.path(), api)?;
        let transcript = run_lines(
            &mut ws,
            "/story_model 1\n/product_item product_1.png\n/stitch\n/generate\n/analyze\n/edit 1 Old Car!\n/apply\n/versions\n/save\n/status\n/quit\n/catalog\n",
        )?;

        assert!(transcript.contains("Product: product_1.png"));
        assert!(transcript.contains("Generated: https://replicate.delivery/out-1.jpg"));
        assert!(transcript.contains("1. [Title] New Car!"));
        assert!(transcript.contains("Version 2: https://replicate.delivery/out-3.jpg"));
        assert!(transcript.contains("Saved: "));
        assert!(transcript.contains("last event: story_saved"));
        assert!(!transcript.contains("Story models:"));
        assert!(!transcript.contains("Error:"));
        assert!(!transcript.contains("last error"));

        let saved = Session::load(temp.path().join("out").join(SESSION_FILE));
        assert_eq!(saved.versions.len(), 2);
        assert_eq!(saved.current_version, 1);
        assert_eq!(
            saved.generated_url.as_deref(),
            Some("https://replicate.delivery/out-3.jpg")
        );
        assert!(temp.path().join("out").join("instagram-story.jpg").is_file());
        assert!(temp.path().join("out").join(EVENTS_FILE).is_file());
        assert!(temp
            .path()
            .join("out")
            .join(RECEIPTS_DIR)
            .join("receipt-apply-pred-3.json")
            .is_file());
        Ok(())
    }

    fn title_api() -> InstantApi {
        InstantApi {
            analysis: r#"{"textBlocks": [{"type": "Title", "content": "New Car!"}]}"#.to_string(),
            ..InstantApi::default()
        }
    }

    #[test]
    fn repeat_apply_needs_a_fresh_analysis() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let mut ws = workspace(temp.path(), title_api())?;
        let transcript = run_lines(
            &mut ws,
            "/story_model 1\n/product_item 1\n/stitch\n/generate\n/analyze\n/edit 1 Old Car!\n/apply\n/apply\n",
        )?;
        assert!(transcript.contains("Error: No prompt provided"));
        assert_eq!(ws.session.versions.len(), 2);
        assert_eq!(ws.session.apply_prompt(), None);
        assert_eq!(*ws.studio.api().created.borrow(), 3);
        Ok(())
    }

    #[test]
    fn apply_edits_the_image_that_was_analyzed() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let mut ws = workspace(temp.path(), title_api())?;
        ws.session
            .record_generation("https://replicate.delivery/current.jpg", "prompt");
        ws.analyze(Some("https://cdn.example.com/other.jpg"))?;
        ws.session.edit_block(0, "Old Car!")?;
        ws.apply()?;

        let inputs = ws.studio.api().inputs.borrow();
        let edit_input = inputs.last().ok_or_else(|| anyhow!("no edit submitted"))?;
        assert_eq!(edit_input["input_image"], json!("https://cdn.example.com/other.jpg"));
        assert_eq!(ws.session.versions.len(), 2);
        Ok(())
    }

    #[test]
    fn studio_loop_reports_errors_and_keeps_going() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let mut ws = workspace(temp.path(), InstantApi::default())?;
        let transcript = run_lines(&mut ws, "/generate\n/apply\n/bogus\n/version x\n/status\n")?;
        assert!(transcript.contains("Error: Stitch the images first"));
        assert!(transcript.contains("Error: No image provided"));
        assert!(transcript.contains("Unknown command: /bogus"));
        assert!(transcript.contains("usage: /version <n>"));
        assert!(transcript.contains("last error: No image provided"));
        Ok(())
    }

    #[test]
    fn uploads_must_be_images() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let mut ws = workspace(temp.path(), InstantApi::default())?;
        let text_file = temp.path().join("notes.png");
        std::fs::write(&text_file, "not an image")?;
        let transcript = run_lines(&mut ws, &format!("/story {}\n", text_file.display()))?;
        assert!(transcript.contains("Error: Please upload an image file"));
        assert_eq!(ws.session.story, None);
        Ok(())
    }

    #[test]
    fn uploaded_catalog_file_keeps_its_caption() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let mut ws = workspace(temp.path(), InstantApi::default())?;
        let product = temp.path().join("img").join("product_1.png");
        ws.set_product(&product.to_string_lossy())?;
        assert_eq!(ws.session.product_caption.as_deref(), Some("A lama plush"));

        let custom = temp.path().join("mine.png");
        write_png(&custom, [1, 2, 3])?;
        ws.set_product(&custom.to_string_lossy())?;
        assert_eq!(ws.session.product_caption.as_deref(), Some("the product"));
        assert!(ws.set_product("product_9.png").is_err());
        Ok(())
    }

    #[test]
    fn render_versions_marks_current() {
        let mut session = Session::new("session.json");
        session.record_generation("https://replicate.delivery/a.jpg", "prompt");
        session.record_edit("https://replicate.delivery/b.jpg", "edit");
        let _ = session.select_version(0);
        let text = render_versions(&session);
        assert!(text.starts_with("* 1. v1 generate https://replicate.delivery/a.jpg\n"));
        assert!(text.contains("  2. v2 apply https://replicate.delivery/b.jpg"));
    }
}
