/// Renderer turning provisioning-URI text into a QR code image.
///
/// The engine only hands over the text and consumes raw image bytes plus a
/// MIME type; how the image is produced (an in-process encoder, a call to a
/// rendering service) is entirely the implementation's concern.
pub trait QrCodeProvider {
    /// Error type for a renderer that failed to produce an image
    type Error;

    /// Render `text` as a QR code image of roughly `size` pixels per side
    fn qr_code_image(&self, text: &str, size: u32) -> Result<Vec<u8>, Self::Error>;

    /// MIME type of the images this renderer produces, e.g. `image/png`
    fn mime_type(&self) -> &str;
}
