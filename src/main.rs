use clap::{Parser, Subcommand};
use dinkum::reader::{read_single, scan_headers, scan_sensors, ReadOptions};
use dinkum::SensorInfo;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dinkum")]
#[command(about = "Read Slocum glider Dinkum Binary Data (DBD) files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan file headers: mission name and sensor-list CRC per file
    Headers {
        files: Vec<PathBuf>,
        #[arg(short = 'm', long = "skip-mission")]
        skip_missions: Vec<String>,
        #[arg(short = 'M', long = "keep-mission")]
        keep_missions: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show the union sensor list across files
    Sensors {
        files: Vec<PathBuf>,
        #[arg(short = 'C', long)]
        cache: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Decode one file and summarize its columns
    Info {
        file: PathBuf,
        #[arg(short = 'C', long)]
        cache: Option<PathBuf>,
        /// Resynchronize on unexpected tag bytes
        #[arg(long)]
        repair: bool,
        /// Keep the first record instead of dropping it
        #[arg(long)]
        keep_first: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();
    match &cli.command {
        Commands::Headers { files, skip_missions, keep_missions, json } => {
            let opts = ReadOptions {
                skip_missions: skip_missions.clone(),
                keep_missions: keep_missions.clone(),
                ..ReadOptions::default()
            };
            let scans = scan_headers(files, &opts)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&scans)?);
            } else {
                println!("{:<32} {:<24} {:<10}", "File", "Mission", "CRC");
                for s in &scans {
                    println!(
                        "{:<32} {:<24} {:<10}",
                        s.filename.display(),
                        s.mission_name,
                        s.sensor_list_crc
                    );
                }
            }
        }
        Commands::Sensors { files, cache, json } => {
            let opts = ReadOptions { cache_dir: cache.clone(), ..ReadOptions::default() };
            let union = scan_sensors(files, &opts)?;
            if *json {
                let infos: Vec<SensorInfo> = union
                    .iter()
                    .map(|s| SensorInfo {
                        name: s.name.clone(),
                        units: s.units.clone(),
                        size: s.size,
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&infos)?);
            } else {
                println!("{:<40} {:<16} {:<5}", "Sensor", "Units", "Size");
                for s in &union {
                    println!("{:<40} {:<16} {:<5}", s.name, s.units, s.size);
                }
                println!("{} sensors", union.len());
            }
        }
        Commands::Info { file, cache, repair, keep_first } => {
            let opts = ReadOptions {
                cache_dir: cache.clone(),
                repair: *repair,
                skip_first_record: !*keep_first,
                ..ReadOptions::default()
            };
            let result = read_single(file, &opts)?;

            println!("--- {} ---", file.display());
            println!("Mission:  {}", result.header.mission_name());
            println!("Opened:   {}", result.header.fileopen_time());
            if let Some(epoch) = result.header.fileopen_epoch() {
                println!("Epoch:    {epoch}");
            }
            println!("Encoding: {}", result.header.encoding_version());
            println!("CRC:      {}", result.header.sensor_list_crc());
            println!("Records:  {}", result.data.n_records);
            println!();
            println!("{:<40} {:<16} {:<5}", "Column", "Units", "Size");
            for i in 0..result.data.columns.len() {
                println!(
                    "{:<40} {:<16} {:<5}",
                    result.data.sensor_names[i],
                    result.data.sensor_units[i],
                    result.data.sensor_sizes[i]
                );
            }
        }
    }
    Ok(())
}
