use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Resize mode, target width and height, gravity and enlarge flag.
/// The proxy gets asked for the same transformation every time.
const RESIZE: &str = "fit";
const WIDTH: u32 = 0;
const HEIGHT: u32 = 0;
const GRAVITY: &str = "no";
const ENLARGE: u8 = 1;

/// Output extension used by [`ProxySigner::sign`].
pub const DEFAULT_EXTENSION: &str = "jpg";

/// Signs image URLs for the image proxy.
///
/// Holds the already decoded key and salt, so signing itself can't fail.
#[derive(Clone)]
pub struct ProxySigner {
    key: Vec<u8>,
    salt: Vec<u8>,
    base_url: String,
}

impl std::fmt::Debug for ProxySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Keep the secrets out of the logs.
        f.debug_struct("ProxySigner")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ProxySigner {
    pub fn new(key: Vec<u8>, salt: Vec<u8>, base_url: impl Into<String>) -> ProxySigner {
        ProxySigner {
            key,
            salt,
            base_url: base_url.into(),
        }
    }

    /// Decode `key` and `salt` from hex and make a signer out of them.
    pub fn from_hex(
        key: &str,
        salt: &str,
        base_url: impl Into<String>,
    ) -> Result<ProxySigner, hex::FromHexError> {
        Ok(ProxySigner::new(hex::decode(key)?, hex::decode(salt)?, base_url))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sign `url`, asking the proxy for a JPEG.
    pub fn sign(&self, url: &str) -> String {
        self.sign_with_extension(url, DEFAULT_EXTENSION)
    }

    /// Sign `url`, asking the proxy to output `extension`.
    ///
    /// Returns `{base_url}{signature}/fit/0/0/no/1/{base64url(url)}.{extension}`.
    pub fn sign_with_extension(&self, url: &str, extension: &str) -> String {
        let path = proxy_path(url, extension);
        let signature = signature(&self.key, &self.salt, &path);
        format!("{}{}{}", self.base_url, signature, path)
    }
}

/// Sign `url` with a hex encoded key and salt in one go.
///
/// Bad hex aborts the whole thing; no unsigned URL comes out of it.
///
/// The bot itself decodes its key and salt once at startup (see
/// [`crate::config::Config`]) and signs through [`ProxySigner`]. This is the
/// one-off entry point for other users of this library holding raw hex.
pub fn sign_with_hex(
    key: &str,
    salt: &str,
    base_url: &str,
    url: &str,
    extension: &str,
) -> Result<String, hex::FromHexError> {
    Ok(ProxySigner::from_hex(key, salt, base_url)?.sign_with_extension(url, extension))
}

/// The transformation path that gets signed, with a leading `/`.
fn proxy_path(url: &str, extension: &str) -> String {
    let encoded_url = URL_SAFE_NO_PAD.encode(url);
    format!("/{RESIZE}/{WIDTH}/{HEIGHT}/{GRAVITY}/{ENLARGE}/{encoded_url}.{extension}")
}

/// HMAC-SHA256 over `salt || path`, base64url encoded without padding.
fn signature(key: &[u8], salt: &[u8], path: &str) -> String {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC takes a key of any size");
    mac.update(salt);
    mac.update(path.as_bytes());
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "943b421c9eb07c830af81030552c86009268de4e532ba2ee2eab8247c6da0881";
    const SALT: &str = "520f986b998545b4785e0defbc4f3c1203f22de2374a3d53cb7a7fe9fea309c5";
    const BASE: &str = "https://proxy.example.com/";
    const IMAGE: &str = "https://i.pximg.net/img-original/img/2020/01/01/00/00/00/12345_p0.png";

    fn signer() -> ProxySigner {
        ProxySigner::from_hex(KEY, SALT, BASE).unwrap()
    }

    #[test]
    fn known_signature() {
        assert_eq!(
            signer().sign(IMAGE),
            concat!(
                "https://proxy.example.com/",
                "Qa6BsM1xU0UWGWVLO--E1gJ83gN0eqj6V7qdHq6s7hc",
                "/fit/0/0/no/1/",
                "aHR0cHM6Ly9pLnB4aW1nLm5ldC9pbWctb3JpZ2luYWwvaW1nLzIwMjAvMDEvMDEvMDAvMDAvMDAvMTIzNDVfcDAucG5n",
                ".jpg"
            )
        );
    }

    #[test]
    fn deterministic() {
        let signer = signer();
        assert_eq!(
            signer.sign_with_extension(IMAGE, "png"),
            signer.sign_with_extension(IMAGE, "png")
        );
    }

    /// Pull out just the signature segment.
    fn signature_of(signed: &str) -> &str {
        signed
            .strip_prefix(BASE)
            .unwrap()
            .split('/')
            .next()
            .unwrap()
    }

    #[test]
    fn any_input_change_changes_signature() {
        let original = signer().sign(IMAGE);
        let original_sig = signature_of(&original);

        let other_url = signer().sign(&IMAGE.replace("12345", "12346"));
        assert_ne!(signature_of(&other_url), original_sig);

        let mut key = hex::decode(KEY).unwrap();
        key[0] ^= 1;
        let other_key = ProxySigner::new(key, hex::decode(SALT).unwrap(), BASE).sign(IMAGE);
        assert_ne!(signature_of(&other_key), original_sig);

        let mut salt = hex::decode(SALT).unwrap();
        salt[31] ^= 0x80;
        let other_salt = ProxySigner::new(hex::decode(KEY).unwrap(), salt, BASE).sign(IMAGE);
        assert_ne!(signature_of(&other_salt), original_sig);
    }

    #[test]
    fn path_shape() {
        let signed = signer().sign_with_extension(IMAGE, "webp");
        let rest = signed.strip_prefix(BASE).unwrap();
        let segments: Vec<&str> = rest.split('/').collect();
        // signature, fit, 0, 0, no, 1, then the encoded URL.
        assert_eq!(segments.len(), 7);
        assert_eq!(&segments[1..6], &["fit", "0", "0", "no", "1"]);
        assert!(segments[6].ends_with(".webp"));

        let encoded = segments[6].strip_suffix(".webp").unwrap();
        assert!(!encoded.contains(['=', '+', '/']));
        assert_eq!(URL_SAFE_NO_PAD.decode(encoded).unwrap(), IMAGE.as_bytes());
    }

    #[test]
    fn bad_hex_is_an_error() {
        assert!(sign_with_hex("not hex", SALT, BASE, IMAGE, "jpg").is_err());
        assert!(sign_with_hex(KEY, "abc", BASE, IMAGE, "jpg").is_err());
        assert_eq!(
            sign_with_hex(KEY, SALT, BASE, IMAGE, "jpg").unwrap(),
            signer().sign(IMAGE)
        );
    }
}
