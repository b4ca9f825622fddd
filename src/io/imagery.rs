use crate::core::image_radiance::BandImage;
use crate::types::{CalError, CalResult, GeoTransform};
use ndarray::Array2;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

fn tiff_err(context: &str, e: tiff::TiffError) -> CalError {
    CalError::InputParseError(format!("{}: {}", context, e))
}

/// GeoTIFF band reader
pub struct ImageReader;

impl ImageReader {
    /// Read a north-up single-band GeoTIFF. The geotransform comes from the
    /// ModelTiepoint and ModelPixelScale tags; the UTM zone is supplied by
    /// the scene metadata.
    pub fn read_band<P: AsRef<Path>>(path: P, utm_zone: u8) -> CalResult<BandImage> {
        log::info!("Reading band image: {}", path.as_ref().display());
        let file = File::open(path.as_ref())?;
        let mut decoder = Decoder::new(BufReader::new(file))
            .map_err(|e| tiff_err("failed to decode TIFF", e))?;

        let (width, height) = decoder
            .dimensions()
            .map_err(|e| tiff_err("failed to get dimensions", e))?;
        let geo_transform = Self::geo_transform(&mut decoder)?;
        log::debug!("Image size: {}x{}", width, height);
        log::debug!("Image geotransform: {:?}", geo_transform);

        let pixels: Vec<f32> = match decoder
            .read_image()
            .map_err(|e| tiff_err("failed to read image", e))?
        {
            DecodingResult::U8(data) => data.iter().map(|&x| x as f32).collect(),
            DecodingResult::U16(data) => data.iter().map(|&x| x as f32).collect(),
            DecodingResult::U32(data) => data.iter().map(|&x| x as f32).collect(),
            DecodingResult::I16(data) => data.iter().map(|&x| x as f32).collect(),
            DecodingResult::F32(data) => data,
            DecodingResult::F64(data) => data.iter().map(|&x| x as f32).collect(),
            _ => {
                return Err(CalError::InputParseError(
                    "unsupported pixel format".to_string(),
                ))
            }
        };

        let data = Array2::from_shape_vec((height as usize, width as usize), pixels)
            .map_err(|e| CalError::InputParseError(format!("failed to reshape band: {}", e)))?;
        Ok(BandImage::new(data, geo_transform, utm_zone))
    }

    fn geo_transform<R: std::io::Read + std::io::Seek>(
        decoder: &mut Decoder<R>,
    ) -> CalResult<GeoTransform> {
        let scale = decoder
            .get_tag_f64_vec(Tag::ModelPixelScaleTag)
            .map_err(|e| tiff_err("missing ModelPixelScale", e))?;
        let tiepoint = decoder
            .get_tag_f64_vec(Tag::ModelTiepointTag)
            .map_err(|e| tiff_err("missing ModelTiepoint", e))?;
        if scale.len() < 2 || tiepoint.len() < 6 {
            return Err(CalError::InputParseError(format!(
                "short georeferencing tags: scale {:?}, tiepoint {:?}",
                scale, tiepoint
            )));
        }

        // Tiepoint maps raster (i, j) to model (x, y)
        let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
        Ok(GeoTransform::from_array([
            x - i * scale[0],
            scale[0],
            0.0,
            y + j * scale[1],
            0.0,
            -scale[1],
        ]))
    }

    /// Read through GDAL, for formats the TIFF decoder does not handle
    #[cfg(feature = "gdal")]
    pub fn read_band_gdal<P: AsRef<Path>>(path: P, utm_zone: u8) -> CalResult<BandImage> {
        use gdal::Dataset;

        let gdal_err = |e: gdal::errors::GdalError| CalError::InputParseError(format!("GDAL: {}", e));
        log::info!("Reading band image with GDAL: {}", path.as_ref().display());

        let dataset = Dataset::open(path.as_ref()).map_err(gdal_err)?;
        let geo_transform = dataset.geo_transform().map_err(gdal_err)?;
        let (width, height) = dataset.raster_size();
        log::debug!("Image size: {}x{}", width, height);

        let rasterband = dataset.rasterband(1).map_err(gdal_err)?;
        let band_data = rasterband
            .read_as::<f32>((0, 0), (width, height), (width, height), None)
            .map_err(gdal_err)?;
        let data = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| CalError::InputParseError(format!("failed to reshape band: {}", e)))?;

        Ok(BandImage::new(
            data,
            GeoTransform::from_array(geo_transform),
            utm_zone,
        ))
    }
}
