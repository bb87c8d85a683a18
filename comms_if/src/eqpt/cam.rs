//! # Camera Equipment Communications Module
//!
//! Frames travel between the simulator and the rover software as base64 encoded image files
//! (JPEG in practice). Internally they are handled as `(height, width, 3)` RGB rasters.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::convert::TryFrom;

use image::{DynamicImage, RgbImage};
use ndarray::{Array3, ArrayView3};

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// An RGB raster with dimension order row, column, channel.
pub type Raster = Array3<u8>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An individual encoded frame, holding the raw bytes of the image file.
#[derive(Debug, Clone, PartialEq)]
pub struct CamFrame {
    /// The formatted image data
    pub data: Vec<u8>
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Possible formats for encoded frames. This is used rather than image::ImageFormat to restrict
/// the formats that can be produced.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ImageFormat {
    /// PNG image
    Png,

    /// JPEG image with a quality value between 1 and 100, where 100 is best.
    Jpeg(u8)
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Frame data is not valid base64: {0}")]
    Base64(base64::DecodeError),

    #[error("Frame data is not a decodable image: {0}")]
    Image(image::ImageError),

    #[error("Decoded image has an unexpected shape: {0}")]
    Shape(ndarray::ShapeError)
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Cannot encode an empty raster")]
    EmptyRaster,

    #[error("Expected a (rows, cols, 3) raster, found shape {0:?}")]
    InvalidShape(Vec<usize>),

    #[error("Raster dimensions {0:?} do not fit in an image")]
    TooLarge(Vec<usize>),

    #[error("Image encoder failed: {0}")]
    Image(image::ImageError)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CamFrame {
    /// Build a frame from its base64 representation.
    ///
    /// Whitespace inside the string is ignored, as some encoders wrap long lines.
    pub fn from_base64(b64: &str) -> Result<Self, DecodeError> {
        let compact: String = b64.chars().filter(|c| !c.is_ascii_whitespace()).collect();

        let data = base64::decode(compact).map_err(DecodeError::Base64)?;

        Ok(Self { data })
    }

    /// Get the base64 representation of this frame.
    pub fn to_base64(&self) -> String {
        base64::encode(&self.data)
    }

    /// Convert this frame into an RGB raster.
    pub fn to_raster(&self) -> Result<Raster, DecodeError> {
        let image = image::load_from_memory(&self.data)
            .map_err(DecodeError::Image)?
            .to_rgb8();

        let (width, height) = image.dimensions();

        Array3::from_shape_vec((height as usize, width as usize, 3), image.into_raw())
            .map_err(DecodeError::Shape)
    }

    /// Encode the given raster into a frame with the given format.
    pub fn from_raster(raster: ArrayView3<u8>, format: ImageFormat) -> Result<Self, EncodeError> {
        let shape = raster.shape().to_vec();

        if raster.is_empty() {
            return Err(EncodeError::EmptyRaster)
        }
        if shape[2] != 3 {
            return Err(EncodeError::InvalidShape(shape))
        }

        let height = u32::try_from(shape[0]).map_err(|_| EncodeError::TooLarge(shape.clone()))?;
        let width = u32::try_from(shape[1]).map_err(|_| EncodeError::TooLarge(shape.clone()))?;

        // Iteration is in logical (row, col, channel) order regardless of the memory layout
        let pixels: Vec<u8> = raster.iter().copied().collect();

        let image = match RgbImage::from_raw(width, height, pixels) {
            Some(i) => DynamicImage::ImageRgb8(i),
            None => return Err(EncodeError::InvalidShape(shape))
        };

        // Get the output format type
        let output_format = match format {
            ImageFormat::Png => image::ImageOutputFormat::Png,
            ImageFormat::Jpeg(q)  => image::ImageOutputFormat::Jpeg(q)
        };

        // Write data to the buffer
        let mut data = Vec::<u8>::new();
        image.write_to(&mut data, output_format).map_err(EncodeError::Image)?;

        Ok(Self { data })
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Decode a base64 encoded image into an RGB raster.
pub fn decode(b64: &str) -> Result<Raster, DecodeError> {
    CamFrame::from_base64(b64)?.to_raster()
}

/// Encode an RGB raster into a base64 encoded image of the given format.
pub fn encode(raster: ArrayView3<u8>, format: ImageFormat) -> Result<String, EncodeError> {
    Ok(CamFrame::from_raster(raster, format)?.to_base64())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
