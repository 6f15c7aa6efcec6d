//! Prompt templates sent to the backend.

/// Request for the post body.
pub fn post_text(prompt: &str) -> String {
    format!("Сгенерируй пост: {prompt}. Напиши только текст поста, без пояснений.")
}

/// Request for the illustration of the same post.
pub fn post_image(prompt: &str) -> String {
    format!("Сгенерируй изображение для поста: {prompt}")
}
