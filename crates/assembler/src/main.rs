use clap::Parser;
use ls8_assembler::{Assembler, Disassembler};
use ls8_common::ProgramImage;
use std::path::{Path, PathBuf};

#[derive(Parser)]
struct Args {
    input: PathBuf,
    output: PathBuf,
    /// turn an image (or an `.ls8` listing) back into assembly
    #[clap(long, short)]
    disassemble: bool,
    /// write an `.ls8` listing instead of a binary image
    #[clap(long, short, conflicts_with = "disassemble")]
    listing: bool,
}

fn is_listing(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "ls8")
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Args {
        input,
        output,
        disassemble,
        listing,
    } = Args::parse();

    if disassemble {
        let program = if is_listing(&input) {
            ProgramImage::from_listing_file(&input)?
        } else {
            ProgramImage::load(&input)?
        };
        let disassembler = Disassembler::from_image(&program);
        let code = disassembler.disassemble_program(&program.data)?;
        std::fs::write(&output, code)
            .map_err(|e| format!("Failed to write output file '{}': {e}", output.display()))?;
    } else {
        let program = std::fs::read_to_string(&input)?;
        let mut assembler = Assembler::new();
        let image = assembler.assemble_program(&program)?;
        if listing {
            let text = Disassembler::from_image(&image).listing(&image.data)?;
            std::fs::write(&output, text)
                .map_err(|e| format!("Failed to write output file '{}': {e}", output.display()))?;
        } else {
            image.save(output)?;
        }
    }

    Ok(())
}
