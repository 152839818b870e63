use crate::core::io::traits::StructureFile;
use crate::core::models::atom::Atom;
use crate::core::models::residue::{ParseResidueTypeError, Residue, ResidueType};
use crate::core::models::structure::{Structure, StructureError};
use nalgebra::Point3;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PdbError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error on line {line}: {kind}")]
    Parse { line: usize, kind: PdbParseErrorKind },
    #[error("Unsupported residue '{name}' on line {line}")]
    UnsupportedResidue { line: usize, name: String },
    #[error("Inconsistent structure: {0}")]
    Structure(#[from] StructureError),
    #[error("No ATOM records found; the file does not contain a parsable chain")]
    NoChain,
}

#[derive(Debug, Error)]
pub enum PdbParseErrorKind {
    #[error("Invalid integer format in columns {columns} (value: '{value}')")]
    InvalidInt { columns: &'static str, value: String },
    #[error("Invalid float format in columns {columns} (value: '{value}')")]
    InvalidFloat { columns: &'static str, value: String },
    #[error("Required field in columns {columns} is empty")]
    MissingRequiredField { columns: &'static str },
    #[error("Line is too short for an ATOM record (must reach column 54)")]
    LineTooShort,
}

/// One ATOM/HETATM line, independent of any residue grouping.
///
/// Fragments exchanged with the external tools are handled at this level,
/// since their atom order carries meaning (constraint indices, appended
/// hydrogens) that a residue tree would lose.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomRecord {
    pub serial: usize,
    pub name: String,
    pub alt_loc: Option<char>,
    pub residue_name: String,
    pub chain_id: char,
    pub residue_number: isize,
    pub insertion_code: Option<char>,
    pub position: Point3<f64>,
    pub occupancy: f64,
    pub temp_factor: f64,
    pub element: String,
}

impl AtomRecord {
    pub fn from_atom(atom: &Atom, residue: &Residue, chain_id: char) -> Self {
        Self {
            serial: atom.serial,
            name: atom.name.clone(),
            alt_loc: atom.alt_loc,
            residue_name: residue.name.clone(),
            chain_id,
            residue_number: residue.number,
            insertion_code: residue.insertion_code,
            position: atom.position,
            occupancy: atom.occupancy,
            temp_factor: atom.temp_factor,
            element: atom.element.clone(),
        }
    }

    fn to_atom(&self) -> Atom {
        let mut atom = Atom::new(self.serial, &self.name, self.position).with_element(&self.element);
        atom.alt_loc = self.alt_loc;
        atom.occupancy = self.occupancy;
        atom.temp_factor = self.temp_factor;
        atom
    }
}

fn slice_and_trim(line: &str, start: usize, end: usize) -> &str {
    line.get(start..end).unwrap_or("").trim()
}

fn column_char(line: &str, column: usize) -> Option<char> {
    line.get(column..column + 1)
        .and_then(|s| s.chars().next())
        .filter(|c| !c.is_whitespace())
}

fn parse_float(line: &str, start: usize, end: usize, columns: &'static str, line_num: usize) -> Result<f64, PdbError> {
    let value = slice_and_trim(line, start, end);
    value.parse().map_err(|_| PdbError::Parse {
        line: line_num,
        kind: PdbParseErrorKind::InvalidFloat {
            columns,
            value: value.into(),
        },
    })
}

fn parse_optional_float(line: &str, start: usize, end: usize, default: f64) -> f64 {
    slice_and_trim(line, start, end).parse().unwrap_or(default)
}

/// Parses the fixed columns of an ATOM or HETATM line.
fn parse_atom_line(line: &str, line_num: usize) -> Result<AtomRecord, PdbError> {
    if line.len() < 54 {
        return Err(PdbError::Parse {
            line: line_num,
            kind: PdbParseErrorKind::LineTooShort,
        });
    }

    let serial_str = slice_and_trim(line, 6, 11);
    let name = slice_and_trim(line, 12, 16);
    let residue_name = slice_and_trim(line, 17, 20);
    let res_num_str = slice_and_trim(line, 22, 26);

    if name.is_empty() {
        return Err(PdbError::Parse {
            line: line_num,
            kind: PdbParseErrorKind::MissingRequiredField { columns: "13-16" },
        });
    }
    if residue_name.is_empty() {
        return Err(PdbError::Parse {
            line: line_num,
            kind: PdbParseErrorKind::MissingRequiredField { columns: "18-20" },
        });
    }
    // Some tools leave the serial blank; fall back to the line position.
    let serial = if serial_str.is_empty() {
        line_num
    } else {
        serial_str.parse().map_err(|_| PdbError::Parse {
            line: line_num,
            kind: PdbParseErrorKind::InvalidInt {
                columns: "7-11",
                value: serial_str.into(),
            },
        })?
    };
    let residue_number: isize = res_num_str.parse().map_err(|_| PdbError::Parse {
        line: line_num,
        kind: PdbParseErrorKind::InvalidInt {
            columns: "23-26",
            value: res_num_str.into(),
        },
    })?;

    let x = parse_float(line, 30, 38, "31-38", line_num)?;
    let y = parse_float(line, 38, 46, "39-46", line_num)?;
    let z = parse_float(line, 46, 54, "47-54", line_num)?;

    Ok(AtomRecord {
        serial,
        name: name.to_string(),
        alt_loc: column_char(line, 16),
        residue_name: residue_name.to_string(),
        chain_id: column_char(line, 21).unwrap_or(' '),
        residue_number,
        insertion_code: column_char(line, 26),
        position: Point3::new(x, y, z),
        occupancy: parse_optional_float(line, 54, 60, 1.0),
        temp_factor: parse_optional_float(line, 60, 66, 0.0),
        element: slice_and_trim(line, 76, 78).to_string(),
    })
}

fn format_atom_name(name: &str) -> String {
    if name.len() >= 4 {
        name[..4].to_string()
    } else {
        format!(" {:<3}", name)
    }
}

fn write_atom_record(writer: &mut impl Write, record: &AtomRecord) -> io::Result<()> {
    let residue_name = if record.residue_name.len() > 3 {
        &record.residue_name[..3]
    } else {
        &record.residue_name
    };
    writeln!(
        writer,
        "{:6}{:>5} {:4}{:1}{:>3} {:1}{:>4}{:1}   {:>8.3}{:>8.3}{:>8.3}{:>6.2}{:>6.2}          {:>2}",
        "ATOM",
        record.serial % 100_000,
        format_atom_name(&record.name),
        record.alt_loc.unwrap_or(' '),
        residue_name,
        record.chain_id,
        record.residue_number % 10_000,
        record.insertion_code.unwrap_or(' '),
        record.position.x,
        record.position.y,
        record.position.z,
        record.occupancy,
        record.temp_factor,
        record.element.to_uppercase(),
    )
}

fn write_terminator(writer: &mut impl Write, serial: usize, last: Option<&AtomRecord>) -> io::Result<()> {
    if let Some(last) = last {
        writeln!(
            writer,
            "TER   {:>5}      {:>3} {:1}{:>4}{:1}",
            serial % 100_000,
            last.residue_name,
            last.chain_id,
            last.residue_number % 10_000,
            last.insertion_code.unwrap_or(' ')
        )?;
    }
    writeln!(writer, "END")
}

pub struct PdbFile;

impl PdbFile {
    /// Reads every ATOM/HETATM record of the first model, in file order.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be parsed or reading fails.
    pub fn read_records(reader: &mut impl BufRead) -> Result<Vec<AtomRecord>, PdbError> {
        let mut records = Vec::new();
        for (line_num, line_res) in reader.lines().enumerate() {
            let line = line_res?;
            match slice_and_trim(&line, 0, 6) {
                "ATOM" | "HETATM" => records.push(parse_atom_line(&line, line_num + 1)?),
                "ENDMDL" | "END" => break,
                _ => {}
            }
        }
        Ok(records)
    }

    pub fn read_records_from_path<P: AsRef<Path>>(path: P) -> Result<Vec<AtomRecord>, PdbError> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_records(&mut reader)
    }

    /// Writes the given records as a standalone fragment.
    ///
    /// Serial numbers are reassigned from 1 in record order, so the n-th record
    /// is atom n for any tool that indexes atoms by position.
    pub fn write_records(records: &[AtomRecord], writer: &mut impl Write) -> Result<(), PdbError> {
        for (i, record) in records.iter().enumerate() {
            let renumbered = AtomRecord {
                serial: i + 1,
                ..record.clone()
            };
            write_atom_record(writer, &renumbered)?;
        }
        write_terminator(writer, records.len() + 1, records.last())?;
        Ok(())
    }

    pub fn write_records_to_path<P: AsRef<Path>>(records: &[AtomRecord], path: P) -> Result<(), PdbError> {
        let mut writer = BufWriter::new(File::create(path)?);
        Self::write_records(records, &mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Collects the records of the selected residues, in the given order.
    pub fn residue_records(structure: &Structure, residues: &[usize]) -> Vec<AtomRecord> {
        residues
            .iter()
            .filter_map(|&index| structure.residue(index))
            .flat_map(|residue| {
                residue
                    .atoms()
                    .iter()
                    .map(|atom| AtomRecord::from_atom(atom, residue, structure.chain_id()))
            })
            .collect()
    }
}

impl StructureFile for PdbFile {
    type Error = PdbError;

    fn read_from(reader: &mut impl BufRead) -> Result<Structure, Self::Error> {
        let mut structure: Option<Structure> = None;
        let mut current: Option<Residue> = None;
        let mut skipped_other_chains = 0usize;

        for (line_num, line_res) in reader.lines().enumerate() {
            let line = line_res?;
            let line_num = line_num + 1;

            match slice_and_trim(&line, 0, 6) {
                "ATOM" => {}
                "ENDMDL" | "END" => break,
                _ => continue,
            }

            let record = parse_atom_line(&line, line_num)?;
            let chain = structure.get_or_insert_with(|| Structure::new(record.chain_id));
            if record.chain_id != chain.chain_id() {
                skipped_other_chains += 1;
                continue;
            }
            if !matches!(record.alt_loc, None | Some('A') | Some('1')) {
                continue;
            }

            let starts_new_residue = current.as_ref().is_none_or(|res| {
                res.number != record.residue_number || res.insertion_code != record.insertion_code
            });
            if starts_new_residue {
                if let Some(done) = current.take() {
                    chain.push_residue(done)?;
                }
                let residue_type: ResidueType =
                    record
                        .residue_name
                        .parse()
                        .map_err(|ParseResidueTypeError(name)| PdbError::UnsupportedResidue {
                            line: line_num,
                            name,
                        })?;
                let mut residue = Residue::new(record.residue_number, &record.residue_name, residue_type);
                residue.insertion_code = record.insertion_code;
                current = Some(residue);
            }
            if let Some(residue) = current.as_mut() {
                residue.add_atom(record.to_atom());
            }
        }

        let mut structure = structure.ok_or(PdbError::NoChain)?;
        if let Some(done) = current.take() {
            structure.push_residue(done)?;
        }
        if structure.is_empty() {
            return Err(PdbError::NoChain);
        }
        if skipped_other_chains > 0 {
            debug!(
                chain = %structure.chain_id(),
                skipped = skipped_other_chains,
                "Ignored ATOM records outside the first chain."
            );
        }
        Ok(structure)
    }

    fn write_to(structure: &Structure, writer: &mut impl Write) -> Result<(), Self::Error> {
        let mut last = None;
        let mut max_serial = 0;
        for residue in structure.residues() {
            for atom in residue.atoms() {
                let record = AtomRecord::from_atom(atom, residue, structure.chain_id());
                write_atom_record(writer, &record)?;
                max_serial = max_serial.max(atom.serial);
                last = Some(record);
            }
        }
        write_terminator(writer, max_serial + 1, last.as_ref())?;
        Ok(())
    }
}
