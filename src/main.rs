use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{info, warn, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use mkhdd::{
    DiskImage, FileSystem, FsObject, FsObjectKind, Mbr, PartitionStatus, PartitionType, MB,
    SECTOR_SIZE,
};

#[derive(Parser)]
#[command(name = "mkhdd")]
#[command(about = "Creates a bootable hard-disk image with a populated FAT32 volume", long_about = None)]
struct Cli {
    /// Path to a raw MBR bootsector
    #[arg(short, long)]
    mbr: PathBuf,

    /// Filesystem to use, followed by <,option=value> pairs
    #[arg(short = 'x', long, default_value = "fat32")]
    filesystem: String,

    /// Additional files to be put inside the root directory
    #[arg(short, long, num_args = 1..)]
    files: Vec<PathBuf>,

    /// <file>,<sector> pairs to store outside of the filesystem
    #[arg(short = 't', long = "store")]
    store: Vec<String>,

    /// Root directory for this disk, copied recursively
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// Hard disk size to be generated (in megabytes)
    #[arg(short, long, default_value_t = 64)]
    size: u64,

    /// Generated image format, currently only valid is vmdk
    #[arg(short = 'g', long = "image-format", default_value = "vmdk")]
    image_format: String,

    /// Directory to output image files
    #[arg(short = 'i', long = "image-directory", default_value = ".")]
    image_directory: PathBuf,

    /// Name of the image to be generated
    #[arg(short = 'n', long = "image-name", default_value = "MyHDD")]
    image_name: String,

    /// First-partition alignment (in 512 byte sectors)
    #[arg(short = 'p', long = "part-align", default_value_t = 8)]
    part_align: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Warn };
    let _ = TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stdout,
        ColorChoice::Auto,
    );

    if let Err(err) = run(&cli) {
        println!("ERROR: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    // align for sector size
    let mut image_size = cli.size * MB;
    image_size -= image_size % SECTOR_SIZE;
    let image_sector_count = image_size / SECTOR_SIZE;

    let Some(partition_sectors) = image_sector_count.checked_sub(cli.part_align) else {
        bail!("partition alignment {} exceeds the image size", cli.part_align);
    };

    let mut image = DiskImage::create(
        &cli.image_format,
        &cli.image_directory,
        &cli.image_name,
        image_size,
    )?;

    let mut mbr = Mbr::new(&cli.mbr, image.geometry().clone(), cli.part_align)
        .with_context(|| format!("failed to load MBR from {}", cli.mbr.display()))?;

    let partition_offset = mbr.add_partition(
        partition_sectors,
        PartitionStatus::Bootable,
        PartitionType::Fat32Lba,
    )?;
    mbr.write_into(&mut image)?;

    let mut filesystem = FileSystem::create(
        partition_offset,
        partition_sectors,
        &cli.filesystem,
        Utc::now(),
    )?;

    if let Some(directory) = &cli.directory {
        store_tree(&mut filesystem, &mut image, directory, Path::new("/"))?;
    }

    for file in &cli.files {
        let file_name = file
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("invalid file path {}", file.display()))?;

        info!("storing file {}", file.display());

        let obj = FsObject {
            kind: FsObjectKind::File,
            path: format!("/{file_name}"),
            data: fs::read(file)
                .with_context(|| format!("failed to read {}", file.display()))?,
        };
        filesystem.store(&mut image, &obj)?;
    }

    for directive in &cli.store {
        let (path, sector) = directive
            .split_once(',')
            .with_context(|| format!("invalid store argument format: {directive}"))?;
        let sector: u64 = sector
            .parse()
            .with_context(|| format!("invalid store argument format: {directive}"))?;

        if sector == 0 || sector >= image.geometry().total_sector_count {
            bail!("invalid sector value {sector}");
        }

        info!("storing {path} at sector {sector}");

        let data = fs::read(path).with_context(|| format!("failed to read {path}"))?;
        image.write_at(&data, sector * SECTOR_SIZE)?;
    }

    filesystem.finalize(&mut image)?;
    image.finalize()?;

    Ok(())
}

/// Recursively copies a host directory into the volume. Entries are stored
/// in sorted order so identical inputs produce identical images.
fn store_tree(
    filesystem: &mut FileSystem,
    image: &mut DiskImage,
    host_dir: &Path,
    volume_dir: &Path,
) -> Result<()> {
    let mut entries = fs::read_dir(host_dir)
        .with_context(|| format!("failed to read directory {}", host_dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            warn!(
                "not going to store a non-UTF-8 file name at {}",
                entry.path().display()
            );
            continue;
        };

        let volume_path = volume_dir.join(name);
        let path = volume_path.to_string_lossy().into_owned();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            info!("storing directory {}", entry.path().display());

            filesystem.store(
                image,
                &FsObject { kind: FsObjectKind::Directory, path, data: Vec::new() },
            )?;
            store_tree(filesystem, image, &entry.path(), &volume_path)?;
        } else if file_type.is_file() {
            info!("storing file {}", entry.path().display());

            filesystem.store(
                image,
                &FsObject {
                    kind: FsObjectKind::File,
                    path,
                    data: fs::read(entry.path())
                        .with_context(|| format!("failed to read {}", entry.path().display()))?,
                },
            )?;
        } else {
            warn!(
                "not going to store unknown file type at {}",
                entry.path().display()
            );
        }
    }

    Ok(())
}
