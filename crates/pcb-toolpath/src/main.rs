use std::io::Write;
use std::path::{Path, PathBuf};

use clap::Parser;
use tempfile::NamedTempFile;

use pcb_toolpath::config::JobConfig;
use pcb_toolpath::emit::{to_json, GcodeEmitter};
use pcb_toolpath::error::ToolpathError;
use pcb_toolpath::job::Job;
use pcb_toolpath::offset::MillingDirection;
use pcb_toolpath::{plan, resolve_format, split_output_path, InputFormat};

#[derive(Parser)]
#[command(
    name = "pcb-toolpath",
    version,
    about = "Turn PCB edge-cut Gerbers and Excellon drill files into CNC programs"
)]
struct Cli {
    /// Input file (.gm1, .gko, .gbr, ... or .drl, .xln)
    #[arg(short, long)]
    input: PathBuf,

    /// Output program (input with .nc extension if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Override auto-detected format (gerber, excellon)
    #[arg(long, value_parser = parse_format)]
    format: Option<InputFormat>,

    /// Retract height in mm
    #[arg(short, long, default_value_t = 20.0, allow_negative_numbers = true)]
    retract: f64,

    /// Height at which cutting feed starts, in mm
    #[arg(short, long, default_value_t = 1.0, allow_negative_numbers = true)]
    start: f64,

    /// Final cutting depth in mm
    #[arg(short, long, default_value_t = -1.65, allow_negative_numbers = true)]
    end: f64,

    /// Router diameter in mm (edge cuts only)
    #[arg(short, long, default_value_t = 2.0)]
    tool: f64,

    /// Preferred entry point
    #[arg(short = 'x', long, num_args = 2, value_names = ["X", "Y"], allow_negative_numbers = true)]
    entry: Option<Vec<f64>>,

    /// Feed rate in mm/min
    #[arg(short, long, default_value_t = 100.0)]
    feed: f64,

    /// Feed for plunges and drilling in mm/min (defaults to --feed)
    #[arg(long)]
    plunge_feed: Option<f64>,

    /// Maximum depth per lap in mm (single lap if not specified)
    #[arg(long)]
    pass_depth: Option<f64>,

    /// Spindle speed; emits M03 when given
    #[arg(long)]
    rpm: Option<u32>,

    /// Mill holes wider than this with a cutter of this diameter
    #[arg(long)]
    max_drill: Option<f64>,

    /// Milling direction (conventional, climb)
    #[arg(long, value_parser = parse_milling, default_value = "conventional")]
    milling: MillingDirection,

    /// Write one program per drill tool
    #[arg(long)]
    split: bool,

    /// Output kind (gcode, json)
    #[arg(long, value_parser = parse_emit, default_value = "gcode")]
    emit: Emit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Emit {
    Gcode,
    Json,
}

fn parse_format(s: &str) -> Result<InputFormat, String> {
    match s.to_lowercase().as_str() {
        "gerber" => Ok(InputFormat::Gerber),
        "excellon" => Ok(InputFormat::Excellon),
        _ => Err(format!("Unknown format: {s}. Use: gerber, excellon")),
    }
}

fn parse_milling(s: &str) -> Result<MillingDirection, String> {
    match s.to_lowercase().as_str() {
        "conventional" => Ok(MillingDirection::Conventional),
        "climb" => Ok(MillingDirection::Climb),
        _ => Err(format!("Unknown milling direction: {s}. Use: conventional, climb")),
    }
}

fn parse_emit(s: &str) -> Result<Emit, String> {
    match s.to_lowercase().as_str() {
        "gcode" => Ok(Emit::Gcode),
        "json" => Ok(Emit::Json),
        _ => Err(format!("Unknown output kind: {s}. Use: gcode, json")),
    }
}

impl Cli {
    fn config(&self) -> JobConfig {
        let mut config = JobConfig::new()
            .with_heights(self.retract, self.start, self.end)
            .with_tool_diameter(self.tool)
            .with_feed(self.feed)
            .with_milling(self.milling);
        if let Some(entry) = self.entry.as_deref() {
            if let &[x, y] = entry {
                config = config.with_entry(x, y);
            }
        }
        if let Some(v) = self.plunge_feed {
            config = config.with_plunge_feed(v);
        }
        if let Some(v) = self.pass_depth {
            config = config.with_pass_depth(v);
        }
        if let Some(v) = self.rpm {
            config = config.with_spindle_rpm(v);
        }
        if let Some(v) = self.max_drill {
            config = config.with_max_drill(v);
        }
        config
    }

    fn output_path(&self) -> PathBuf {
        match &self.output {
            Some(p) => p.clone(),
            None => {
                let ext = match self.emit {
                    Emit::Gcode => "nc",
                    Emit::Json => "json",
                };
                self.input.with_extension(ext)
            }
        }
    }
}

fn render(job: &Job, emit: Emit, source: &Path) -> Result<String, ToolpathError> {
    match emit {
        Emit::Gcode => Ok(GcodeEmitter::new()
            .with_comment(format!("Source: {}", source.display()))
            .render(job)?),
        Emit::Json => Ok(to_json(job)?),
    }
}

/// Write through a temporary file in the target directory, then rename.
fn write_atomic(path: &Path, contents: &str) -> Result<(), ToolpathError> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}

fn run(cli: &Cli) -> Result<(), ToolpathError> {
    let text = std::fs::read_to_string(&cli.input)?;
    let format = resolve_format(&cli.input, &text, cli.format)?;
    let config = cli.config();
    let job = plan(&text, format, &config)?;
    let output = cli.output_path();

    // Render everything before touching the filesystem
    let mut files: Vec<(PathBuf, String)> = Vec::new();
    if cli.split && format == InputFormat::Excellon {
        for (tc, part) in job.split_by_tool() {
            let path = match tc {
                Some(tc) => split_output_path(&output, &tc),
                None => output.clone(),
            };
            files.push((path, render(&part, cli.emit, &cli.input)?));
        }
    } else {
        files.push((output, render(&job, cli.emit, &cli.input)?));
    }

    for (path, contents) in &files {
        write_atomic(path, contents)?;
        eprintln!("Written to {}", path.display());
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
