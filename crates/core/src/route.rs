//! Choosing the backend operation for a user message.

/// Phrases that ask for an image to be generated.
const IMAGE_GENERATION_KEYWORDS: &[&str] = &[
    "生成图片",
    "生成一张图片",
    "生成一幅图",
    "画一张",
    "绘制一张",
    "图像生成",
    "图片生成",
    "生成医学图像",
    "创建图片",
    "帮我画",
    "制作图片",
    "绘图",
    "做一张图",
    "generate an image",
    "generate a picture",
    "draw me",
    "create an image",
    "make an image",
];

/// Optional behaviors of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Features {
    /// Stream plain text replies token by token.
    pub streaming: bool,
    /// Accept image attachments and send them as multimodal requests.
    pub image_attach: bool,
    /// Detect image generation requests in plain text.
    pub text_to_image: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            streaming: true,
            image_attach: true,
            text_to_image: true,
        }
    }
}

/// The backend operation that serves a user message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Route {
    /// Generate images from the extracted prompt.
    TextToImage {
        /// What the image should show.
        prompt: String,
    },
    /// Send the text with the attached image.
    Multimodal,
    /// Stream the reply.
    Streaming,
    /// Wait for the complete reply.
    Plain,
}

/// Selects the route of `message`.
///
/// Image generation wins over everything else unless an image is attached,
/// an attached image always goes the multimodal way.
pub fn select_route(
    message: &str,
    has_image: bool,
    features: Features,
) -> Route {
    if features.text_to_image
        && !has_image
        && is_text_to_image_request(message)
    {
        return Route::TextToImage {
            prompt: extract_prompt(message),
        };
    }
    if has_image && features.image_attach {
        return Route::Multimodal;
    }
    if features.streaming {
        Route::Streaming
    } else {
        Route::Plain
    }
}

/// Returns `true` if `message` asks for an image to be generated.
pub fn is_text_to_image_request(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    IMAGE_GENERATION_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

/// Extracts the image description from an image generation request.
///
/// The description is the text following the first matching keyword (up
/// to its next occurrence). The whole message is used when nothing
/// follows the keyword.
pub fn extract_prompt(message: &str) -> String {
    // ASCII lowercasing keeps byte offsets intact.
    let lowered = message.to_ascii_lowercase();
    for keyword in IMAGE_GENERATION_KEYWORDS {
        let Some(start) = lowered.find(keyword) else {
            continue;
        };
        let rest_start = start + keyword.len();
        let rest_len = lowered[rest_start..]
            .find(keyword)
            .unwrap_or(lowered.len() - rest_start);
        let prompt = message[rest_start..rest_start + rest_len].trim();
        if !prompt.is_empty() {
            return prompt.to_owned();
        }
    }
    message.to_owned()
}
