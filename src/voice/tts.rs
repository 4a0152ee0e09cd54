//! Text-to-speech (TTS) synthesis over an OpenAI-compatible speech API

use secrecy::{ExposeSecret, SecretString};

use crate::{Error, Result};

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    url: String,
    api_key: Option<SecretString>,
    voice: String,
    speed: f32,
    model: String,
}

impl TextToSpeech {
    /// Create a new TTS client
    ///
    /// # Arguments
    ///
    /// * `url` - Full speech endpoint (e.g. `http://localhost:8880/v1/audio/speech`)
    /// * `api_key` - Bearer token, if the server requires one
    ///
    /// # Errors
    ///
    /// Returns error if the URL is empty
    pub fn new(
        url: String,
        api_key: Option<SecretString>,
        model: String,
        voice: String,
        speed: f32,
    ) -> Result<Self> {
        if url.trim().is_empty() {
            return Err(Error::Config("TTS endpoint URL required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            url,
            api_key,
            voice,
            speed,
            model,
        })
    }

    /// Synthesize text to speech
    ///
    /// # Returns
    ///
    /// Audio bytes (MP3 format)
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "mp3",
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        tracing::debug!(bytes = audio.len(), voice = %self.voice, "speech synthesized");
        Ok(audio.to_vec())
    }
}
