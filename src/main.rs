use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter};
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use graphbwt::DynamicGBWT;

/// Build, merge, and inspect dynamic GBWT indexes.
#[derive(Parser)]
#[command(name = "graphbwt", about = "Build, merge, and inspect dynamic GBWT indexes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an index from a text file: one sequence per line, node ids
    /// separated by whitespace
    Build {
        /// Path to the input text file
        #[arg(short, long)]
        input: String,
        /// Path to the output .gbwt file
        #[arg(short, long)]
        output: String,
    },
    /// Merge the sequences of one index into another
    Merge {
        /// Path to the index receiving the sequences
        #[arg(long)]
        left: String,
        /// Path to the index being merged in
        #[arg(long)]
        right: String,
        /// Path to the output .gbwt file
        #[arg(short, long)]
        output: String,
        /// Sequences per insertion batch; 0 inserts all at once
        #[arg(long, default_value_t = 0)]
        batch_size: usize,
    },
    /// Print summary statistics for an index
    Stat {
        /// Path to the .gbwt file
        #[arg(short, long)]
        input: String,
    },
}

fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Build { input, output } => build(&input, &output),
        Commands::Merge { left, right, output, batch_size } => merge(&left, &right, &output, batch_size),
        Commands::Stat { input } => stat(&input),
    };
    if let Err(error) = result {
        eprintln!("[graphbwt] Error: {}", error);
        process::exit(1);
    }
}

fn spinner(message: &'static str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner} {msg}").unwrap());
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn build(input: &str, output: &str) -> io::Result<()> {
    println!("[graphbwt] Reading sequences from '{}'", input);
    let text = read_text(input)?;

    let bar = spinner("Inserting sequences...");
    let mut index = DynamicGBWT::new();
    index.insert(&text);
    bar.finish_and_clear();
    println!(
        "[graphbwt] Inserted {} sequences of total length {}",
        index.sequences(),
        index.size()
    );

    write_index(&index, output)?;
    println!("[graphbwt] Wrote '{}'", output);
    Ok(())
}

fn merge(left: &str, right: &str, output: &str, batch_size: usize) -> io::Result<()> {
    let mut index = read_index(left)?;
    let other = read_index(right)?;
    println!(
        "[graphbwt] Merging {} sequences into {}",
        other.sequences(),
        index.sequences()
    );

    let bar = spinner("Merging...");
    index.merge(&other, batch_size);
    bar.finish_and_clear();

    write_index(&index, output)?;
    println!("[graphbwt] Wrote '{}'", output);
    Ok(())
}

fn stat(input: &str) -> io::Result<()> {
    let index = read_index(input)?;
    println!("[graphbwt] {}", input);
    println!("  sequences:          {}", index.sequences());
    println!("  total length:       {}", index.size());
    println!("  alphabet offset:    {}", index.header().offset());
    println!("  alphabet size:      {}", index.sigma());
    println!("  effective alphabet: {}", index.effective());
    println!("  runs:               {}", index.runs());
    Ok(())
}

/// Reads one sequence per line, node ids separated by whitespace, and
/// terminates each with the endmarker. Blank lines are skipped.
fn read_text(path: &str) -> io::Result<Vec<usize>> {
    let reader = BufReader::new(File::open(path)?);
    let mut text: Vec<usize> = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        for field in line.split_whitespace() {
            let node: usize = field.parse().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("line {}: invalid node id '{}'", number + 1, field),
                )
            })?;
            if node == graphbwt::ENDMARKER {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("line {}: node id 0 is reserved", number + 1),
                ));
            }
            text.push(node);
        }
        text.push(graphbwt::ENDMARKER);
    }
    Ok(text)
}

fn read_index(path: &str) -> io::Result<DynamicGBWT> {
    let mut reader = BufReader::new(File::open(path)?);
    DynamicGBWT::load(&mut reader)
}

fn write_index(index: &DynamicGBWT, path: &str) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    index.serialize(&mut writer)
}
