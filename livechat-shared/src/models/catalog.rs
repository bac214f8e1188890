//! Built-in avatar and sticker assets offered at sign-in and in the composer.

/// A named image asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Asset {
    /// Lookup name
    pub name: &'static str,
    /// Image URL
    pub src: &'static str,
}

const fn asset(name: &'static str, src: &'static str) -> Asset {
    Asset { name, src }
}

/// Avatars offered at sign-in.
pub const AVATARS: [Asset; 7] = [
    asset(
        "bear",
        "https://d39ii5l128t5ul.cloudfront.net/assets/animals_square/bear.png",
    ),
    asset(
        "bird",
        "https://d39ii5l128t5ul.cloudfront.net/assets/animals_square/bird.png",
    ),
    asset(
        "bird2",
        "https://d39ii5l128t5ul.cloudfront.net/assets/animals_square/bird2.png",
    ),
    asset(
        "dog",
        "https://d39ii5l128t5ul.cloudfront.net/assets/animals_square/dog.png",
    ),
    asset(
        "giraffe",
        "https://d39ii5l128t5ul.cloudfront.net/assets/animals_square/giraffe.png",
    ),
    asset(
        "hedgehog",
        "https://d39ii5l128t5ul.cloudfront.net/assets/animals_square/hedgehog.png",
    ),
    asset(
        "hippo",
        "https://d39ii5l128t5ul.cloudfront.net/assets/animals_square/hippo.png",
    ),
];

/// Stickers offered in the composer.
pub const STICKERS: [Asset; 10] = [
    asset(
        "cute",
        "https://d39ii5l128t5ul.cloudfront.net/assets/chat/v1/sticker-1.png",
    ),
    asset(
        "angry",
        "https://d39ii5l128t5ul.cloudfront.net/assets/chat/v1/sticker-2.png",
    ),
    asset(
        "sad",
        "https://d39ii5l128t5ul.cloudfront.net/assets/chat/v1/sticker-3.png",
    ),
    asset(
        "happy",
        "https://d39ii5l128t5ul.cloudfront.net/assets/chat/v1/sticker-4.png",
    ),
    asset(
        "surprised",
        "https://d39ii5l128t5ul.cloudfront.net/assets/chat/v1/sticker-5.png",
    ),
    asset(
        "cool",
        "https://d39ii5l128t5ul.cloudfront.net/assets/chat/v1/sticker-6.png",
    ),
    asset(
        "love",
        "https://d39ii5l128t5ul.cloudfront.net/assets/chat/v1/sticker-7.png",
    ),
    asset(
        "rocket",
        "https://d39ii5l128t5ul.cloudfront.net/assets/chat/v1/sticker-8.png",
    ),
    asset(
        "confetti",
        "https://d39ii5l128t5ul.cloudfront.net/assets/chat/v1/sticker-9.png",
    ),
    asset(
        "camera",
        "https://d39ii5l128t5ul.cloudfront.net/assets/chat/v1/sticker-10.png",
    ),
];

fn find(assets: &[Asset], name: &str) -> Option<Asset> {
    assets
        .iter()
        .find(|asset| asset.name.eq_ignore_ascii_case(name))
        .copied()
}

/// Avatar named `name`, ignoring ASCII case.
#[must_use]
pub fn find_avatar(name: &str) -> Option<Asset> {
    find(&AVATARS, name)
}

/// Sticker named `name`, ignoring ASCII case.
#[must_use]
pub fn find_sticker(name: &str) -> Option<Asset> {
    find(&STICKERS, name)
}
