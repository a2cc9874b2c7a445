use std::fs::File;
use std::io;
use std::path::PathBuf;

use anyhow::*;
use log::*;
use memmap2::Mmap;
use rayon::prelude::*;
use structopt::*;

use zipscan::*;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "zip_probe",
    about = "Scans a .zip file for its records and dumps what it finds"
)]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Decompress every file and check its CRC-32 instead of dumping records.
    #[structopt(long)]
    verify: bool,

    #[structopt(name("ZIP file"))]
    zip_path: PathBuf,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    info!("Memory mapping {:#?}", &args.zip_path);
    let zip_file = File::open(&args.zip_path).context("Couldn't open zip file")?;
    let mapping = unsafe { Mmap::map(&zip_file).context("Couldn't mmap zip file")? };

    let archive = Archive::from_bytes(&mapping).context("Couldn't scan archive")?;
    for unknown in archive.unrecognized_sections() {
        warn!(
            "Skipped unknown section {:02x?} at offset {}",
            unknown.discriminator, unknown.offset
        );
    }

    if args.verify {
        verify(&archive)
    } else {
        println!("{:#?}", archive);
        Ok(())
    }
}

fn verify(archive: &Archive) -> Result<()> {
    archive
        .local_files()
        .par_iter()
        .filter(|local| !local.is_dir())
        .try_for_each(|local| -> Result<()> {
            let name = local.file_name()?;
            let mut reader = local
                .contents()
                .with_context(|| format!("Couldn't read {}", name))?;
            let size = io::copy(&mut reader, &mut io::sink())
                .with_context(|| format!("Couldn't decompress {}", name))?;
            info!("{}: {} bytes OK", name, size);
            Ok(())
        })
}
