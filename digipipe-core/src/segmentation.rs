//! Narrow segmentation interface: cell-ID decoding and grid geometry.
//!
//! Cell identifiers pack several fields (`system`, `layer`, `x`, ...) into
//! one 64-bit word. A descriptor such as `"system:8,layer:8,x:32:-16,y:-16"`
//! lists `name:[offset:]width` entries; a negative width marks a signed
//! field and an omitted offset continues after the previous field.

use serde::{Deserialize, Serialize};

use crate::deposit::{CellId, Position};
use crate::error::{Error, Result};

/// One field of a cell-ID descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitField {
    /// Field name.
    pub name: String,
    /// Bit offset of the lowest bit.
    pub offset: u32,
    /// Field width in bits.
    pub width: u32,
    /// Two's-complement signed field.
    pub signed: bool,
}

impl BitField {
    /// Bit mask of the field within the 64-bit word.
    #[must_use]
    pub fn mask(&self) -> u64 {
        let bits = if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        };
        bits << self.offset
    }

    /// Smallest value the field can hold.
    #[must_use]
    pub fn min_value(&self) -> i64 {
        if self.signed {
            i64::MIN >> (64 - self.width)
        } else {
            0
        }
    }

    /// Largest value the field can hold.
    #[must_use]
    pub fn max_value(&self) -> i64 {
        if self.signed {
            !(i64::MIN >> (64 - self.width))
        } else if self.width >= 63 {
            i64::MAX
        } else {
            (1i64 << self.width) - 1
        }
    }
}

/// Encoder/decoder for cell identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitFieldCoder {
    descriptor: String,
    fields: Vec<BitField>,
}

impl BitFieldCoder {
    /// Parses a descriptor string.
    ///
    /// # Errors
    /// Returns [`Error::SegmentationError`] for malformed entries, zero or
    /// oversized widths, duplicate names and overlapping fields.
    pub fn new(descriptor: &str) -> Result<Self> {
        let mut fields: Vec<BitField> = Vec::new();
        let mut next_offset = 0u32;

        for entry in descriptor.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            let (name, offset, width) = match parts.as_slice() {
                [name, width] => (*name, next_offset, parse_width(entry, width)?),
                [name, offset, width] => {
                    let offset = offset.parse::<u32>().map_err(|_| {
                        Error::SegmentationError(format!("bad offset in '{entry}'"))
                    })?;
                    (*name, offset, parse_width(entry, width)?)
                }
                _ => {
                    return Err(Error::SegmentationError(format!(
                        "malformed field '{entry}'"
                    )))
                }
            };
            let (signed, width) = (width < 0, width.unsigned_abs());
            let fits = offset.checked_add(width).is_some_and(|end| end <= 64);
            if name.is_empty() || width == 0 || !fits {
                return Err(Error::SegmentationError(format!(
                    "field '{entry}' does not fit a 64-bit cell ID"
                )));
            }
            let field = BitField {
                name: name.to_string(),
                offset,
                width,
                signed,
            };
            if fields.iter().any(|f| f.name == field.name) {
                return Err(Error::SegmentationError(format!(
                    "duplicate field '{name}'"
                )));
            }
            if let Some(other) = fields.iter().find(|f| f.mask() & field.mask() != 0) {
                return Err(Error::SegmentationError(format!(
                    "field '{name}' overlaps '{}'",
                    other.name
                )));
            }
            next_offset = offset + width;
            fields.push(field);
        }

        Ok(Self {
            descriptor: descriptor.to_string(),
            fields,
        })
    }

    /// Descriptor string this coder was built from.
    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// All fields in descriptor order.
    #[must_use]
    pub fn fields(&self) -> &[BitField] {
        &self.fields
    }

    /// Looks up a field by name.
    ///
    /// # Errors
    /// Returns [`Error::SegmentationError`] if the field does not exist.
    pub fn field(&self, name: &str) -> Result<&BitField> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| Error::SegmentationError(format!("unknown field '{name}'")))
    }

    /// Decodes one field of a cell ID.
    ///
    /// # Errors
    /// Returns [`Error::SegmentationError`] if the field does not exist.
    pub fn get(&self, cell: CellId, name: &str) -> Result<i64> {
        Ok(decode(self.field(name)?, cell))
    }

    /// Encodes one field into a cell ID.
    ///
    /// # Errors
    /// Returns [`Error::SegmentationError`] for unknown fields or values out
    /// of the field's range.
    pub fn set(&self, cell: &mut CellId, name: &str, value: i64) -> Result<()> {
        let field = self.field(name)?;
        if value < field.min_value() || value > field.max_value() {
            return Err(Error::SegmentationError(format!(
                "value {value} out of range for field '{name}'"
            )));
        }
        let mask = field.mask();
        #[allow(clippy::cast_sign_loss)]
        let raw = ((value as u64) << field.offset) & mask;
        *cell = (*cell & !mask) | raw;
        Ok(())
    }
}

fn parse_width(entry: &str, width: &str) -> Result<i32> {
    width
        .parse::<i32>()
        .map_err(|_| Error::SegmentationError(format!("bad width in '{entry}'")))
}

#[allow(clippy::cast_possible_wrap)]
fn decode(field: &BitField, cell: CellId) -> i64 {
    let raw = (cell & field.mask()) >> field.offset;
    if field.signed && field.width < 64 && raw & (1u64 << (field.width - 1)) != 0 {
        raw as i64 - (1i64 << field.width)
    } else {
        raw as i64
    }
}

/// Splits a detector's cells into groups by the value of one field.
///
/// Predicates use it to restrict processing to one detector region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentContext {
    /// Detector name.
    pub detector: String,
    /// Field used to split the detector.
    pub field: String,
    /// Offset of the split field.
    pub offset: u32,
    /// Width of the split field.
    pub width: u32,
    /// Mask selecting the split field in a cell ID.
    pub split_mask: u64,
}

impl SegmentContext {
    /// Builds a context splitting `detector` by `field`.
    ///
    /// # Errors
    /// Returns [`Error::SegmentationError`] if the coder lacks the field.
    pub fn new(detector: &str, coder: &BitFieldCoder, field: &str) -> Result<Self> {
        let f = coder.field(field)?;
        Ok(Self {
            detector: detector.to_string(),
            field: field.to_string(),
            offset: f.offset,
            width: f.width,
            split_mask: f.mask(),
        })
    }

    /// Value of the split field for a cell.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn split_id(&self, cell: CellId) -> u32 {
        ((cell & self.split_mask) >> self.offset) as u32
    }

    /// Number of distinct split values.
    #[must_use]
    pub fn max_split(&self) -> u64 {
        1u64 << self.width.min(63)
    }
}

/// Cartesian segmentation in the local XY plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CartesianGridXY {
    /// Cell size in X.
    pub grid_size_x: f64,
    /// Cell size in Y.
    pub grid_size_y: f64,
    /// Cell offset in X.
    pub offset_x: f64,
    /// Cell offset in Y.
    pub offset_y: f64,
    /// Shift odd layers by half a cell in X.
    pub stagger_x: bool,
    /// Shift odd layers by half a cell in Y.
    pub stagger_y: bool,
    /// Cell-ID field for X.
    pub identifier_x: String,
    /// Cell-ID field for Y.
    pub identifier_y: String,
    /// Cell-ID field for the layer, used by staggering.
    pub identifier_layer: String,
}

impl Default for CartesianGridXY {
    fn default() -> Self {
        Self {
            grid_size_x: 1.0,
            grid_size_y: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            stagger_x: false,
            stagger_y: false,
            identifier_x: "x".to_string(),
            identifier_y: "y".to_string(),
            identifier_layer: "layer".to_string(),
        }
    }
}

impl CartesianGridXY {
    /// Creates a grid with the given cell sizes.
    #[must_use]
    pub fn new(grid_size_x: f64, grid_size_y: f64) -> Self {
        Self {
            grid_size_x,
            grid_size_y,
            ..Self::default()
        }
    }

    /// Sets the grid offsets.
    #[must_use]
    pub fn with_offset(mut self, offset_x: f64, offset_y: f64) -> Self {
        self.offset_x = offset_x;
        self.offset_y = offset_y;
        self
    }

    /// Sets odd-layer staggering.
    #[must_use]
    pub fn with_stagger(mut self, stagger_x: bool, stagger_y: bool) -> Self {
        self.stagger_x = stagger_x;
        self.stagger_y = stagger_y;
        self
    }

    /// Cell dimensions `[x, y]`.
    #[must_use]
    pub fn cell_dimensions(&self) -> [f64; 2] {
        [self.grid_size_x, self.grid_size_y]
    }

    /// Centre position of a cell in the local XY plane (z is zero).
    ///
    /// # Errors
    /// Returns an error if the coder lacks the X or Y field.
    #[allow(clippy::cast_precision_loss)]
    pub fn position(&self, coder: &BitFieldCoder, cell: CellId) -> Result<Position> {
        let (ox, oy) = self.offsets(coder, cell)?;
        let bx = coder.get(cell, &self.identifier_x)?;
        let by = coder.get(cell, &self.identifier_y)?;
        Ok(Position::new(
            bin_to_position(bx, self.grid_size_x, ox),
            bin_to_position(by, self.grid_size_y, oy),
            0.0,
        ))
    }

    /// Cell containing a local position, within the volume `volume_id`.
    ///
    /// # Errors
    /// Returns an error if the coder lacks a field or a bin is out of range.
    pub fn cell_id(
        &self,
        coder: &BitFieldCoder,
        local: Position,
        volume_id: CellId,
    ) -> Result<CellId> {
        let mut cell = volume_id;
        let (ox, oy) = self.offsets(coder, volume_id)?;
        coder.set(
            &mut cell,
            &self.identifier_x,
            position_to_bin(local.x, self.grid_size_x, ox),
        )?;
        coder.set(
            &mut cell,
            &self.identifier_y,
            position_to_bin(local.y, self.grid_size_y, oy),
        )?;
        Ok(cell)
    }

    fn offsets(&self, coder: &BitFieldCoder, cell: CellId) -> Result<(f64, f64)> {
        if !self.stagger_x && !self.stagger_y {
            return Ok((self.offset_x, self.offset_y));
        }
        // Truncating remainder: negative odd layers shift by minus half a cell.
        let half = match coder.get(cell, &self.identifier_layer)? % 2 {
            1 => 0.5,
            -1 => -0.5,
            _ => 0.0,
        };
        let shift = |stagger: bool, size: f64| if stagger { size * half } else { 0.0 };
        Ok((
            self.offset_x + shift(self.stagger_x, self.grid_size_x),
            self.offset_y + shift(self.stagger_y, self.grid_size_y),
        ))
    }
}

#[allow(clippy::cast_precision_loss)]
fn bin_to_position(bin: i64, cell_size: f64, offset: f64) -> f64 {
    bin as f64 * cell_size + offset
}

#[allow(clippy::cast_possible_truncation)]
fn position_to_bin(position: f64, cell_size: f64, offset: f64) -> i64 {
    ((position + 0.5 * cell_size - offset) / cell_size).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const DESCRIPTOR: &str = "system:8,layer:8,x:32:-16,y:-16";

    #[test]
    fn test_descriptor_layout() {
        let coder = BitFieldCoder::new(DESCRIPTOR).unwrap();
        let x = coder.field("x").unwrap();
        assert_eq!((x.offset, x.width, x.signed), (32, 16, true));
        let y = coder.field("y").unwrap();
        assert_eq!((y.offset, y.width, y.signed), (48, 16, true));
        assert_eq!(coder.field("layer").unwrap().offset, 8);
    }

    #[test]
    fn test_signed_round_trip() {
        let coder = BitFieldCoder::new(DESCRIPTOR).unwrap();
        let mut cell = 0;
        coder.set(&mut cell, "system", 5).unwrap();
        coder.set(&mut cell, "x", -3).unwrap();
        coder.set(&mut cell, "y", 7).unwrap();
        assert_eq!(coder.get(cell, "system").unwrap(), 5);
        assert_eq!(coder.get(cell, "x").unwrap(), -3);
        assert_eq!(coder.get(cell, "y").unwrap(), 7);
        assert!(coder.set(&mut cell, "layer", 256).is_err());
    }

    #[test]
    fn test_bad_descriptors() {
        assert!(BitFieldCoder::new("a:8,a:8").is_err());
        assert!(BitFieldCoder::new("a:0:8,b:4:8").is_err());
        assert!(BitFieldCoder::new("a:60:8").is_err());
        assert!(BitFieldCoder::new("a:x").is_err());
        assert!(BitFieldCoder::new("x:4294967295:1").is_err());
        assert!(BitFieldCoder::new("x:18446744073709551615:2").is_err());
    }

    #[test]
    fn test_segment_context_split() {
        let coder = BitFieldCoder::new(DESCRIPTOR).unwrap();
        let context = SegmentContext::new("ecal", &coder, "layer").unwrap();
        let mut cell = 0;
        coder.set(&mut cell, "layer", 12).unwrap();
        coder.set(&mut cell, "x", -1).unwrap();
        assert_eq!(context.split_id(cell), 12);
        assert_eq!(context.max_split(), 256);
    }

    #[test]
    fn test_grid_position_and_cell() {
        let coder = BitFieldCoder::new(DESCRIPTOR).unwrap();
        let grid = CartesianGridXY::new(2.0, 4.0).with_offset(1.0, 0.0);
        let cell = grid
            .cell_id(&coder, Position::new(5.2, -4.1, 0.0), 0)
            .unwrap();
        assert_eq!(coder.get(cell, "x").unwrap(), 2);
        assert_eq!(coder.get(cell, "y").unwrap(), -1);
        let centre = grid.position(&coder, cell).unwrap();
        assert_relative_eq!(centre.x, 5.0);
        assert_relative_eq!(centre.y, -4.0);
    }

    #[test]
    fn test_grid_stagger_odd_layers() {
        let coder = BitFieldCoder::new(DESCRIPTOR).unwrap();
        let grid = CartesianGridXY::new(2.0, 2.0).with_stagger(true, false);
        let mut cell = 0;
        coder.set(&mut cell, "layer", 1).unwrap();
        coder.set(&mut cell, "x", 1).unwrap();
        assert_relative_eq!(grid.position(&coder, cell).unwrap().x, 3.0);
        coder.set(&mut cell, "layer", 2).unwrap();
        assert_relative_eq!(grid.position(&coder, cell).unwrap().x, 2.0);
    }

    #[test]
    fn test_grid_stagger_negative_odd_layer() {
        let coder = BitFieldCoder::new("system:8,layer:-8,x:32:-16,y:-16").unwrap();
        let grid = CartesianGridXY::new(2.0, 2.0).with_stagger(true, false);
        let mut cell = 0;
        coder.set(&mut cell, "layer", -1).unwrap();
        coder.set(&mut cell, "x", 1).unwrap();
        let centre = grid.position(&coder, cell).unwrap();
        assert_relative_eq!(centre.x, 1.0);
        let back = grid.cell_id(&coder, centre, cell & 0xFFFF).unwrap();
        assert_eq!(coder.get(back, "x").unwrap(), 1);
    }
}
