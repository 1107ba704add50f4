//! Loading images to attach to a message.

use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use mime::Mime;
use tokio::fs;

/// The largest image accepted as an attachment, in bytes.
pub const MAX_IMAGE_SIZE: u64 = 5 * 1024 * 1024;

/// The error type of [`load_image`].
#[derive(Debug)]
pub enum ImageError {
    /// The file could not be read.
    Io(io::Error),
    /// The file is larger than [`MAX_IMAGE_SIZE`].
    TooLarge(u64),
    /// The file does not look like an image.
    NotAnImage,
}

impl Display for ImageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::Io(err) => write!(f, "cannot read the image: {err}"),
            ImageError::TooLarge(size) => write!(
                f,
                "the image is {size} bytes, images must be under 5 MiB"
            ),
            ImageError::NotAnImage => f.write_str("the file is not an image"),
        }
    }
}

impl StdError for ImageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ImageError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ImageError {
    fn from(err: io::Error) -> Self {
        ImageError::Io(err)
    }
}

/// Guesses the media type of an image from its file extension.
pub fn image_mime(path: &Path) -> Option<Mime> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "png" => mime::IMAGE_PNG,
        "jpg" | "jpeg" => mime::IMAGE_JPEG,
        "gif" => mime::IMAGE_GIF,
        "bmp" => mime::IMAGE_BMP,
        "svg" => mime::IMAGE_SVG,
        "webp" => "image/webp".parse().ok()?,
        _ => return None,
    };
    Some(mime)
}

/// Encodes image bytes as a `data:` URI.
pub fn to_data_uri(mime: &Mime, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime.essence_str(), STANDARD.encode(bytes))
}

/// Reads an image file and returns it as a `data:` URI, ready to be
/// attached to a session.
pub async fn load_image(path: impl AsRef<Path>) -> Result<String, ImageError> {
    let path = path.as_ref();
    let mime = image_mime(path).ok_or(ImageError::NotAnImage)?;

    let size = fs::metadata(path).await?.len();
    if size > MAX_IMAGE_SIZE {
        return Err(ImageError::TooLarge(size));
    }

    let bytes = fs::read(path).await?;
    debug!("loaded {} bytes of {mime} from {path:?}", bytes.len());
    Ok(to_data_uri(&mime, &bytes))
}
