//! Static catalog of selectable voices.

use crate::types::{Gender, VoiceCategory, VoiceDescriptor};

const fn voice(
    id: &'static str,
    name: &'static str,
    gender: Gender,
    category: VoiceCategory,
    description: &'static str,
) -> VoiceDescriptor {
    VoiceDescriptor {
        id,
        name,
        gender,
        category,
        description,
    }
}

use Gender::{Female, Male, Neutral};
use VoiceCategory::{Character, Heroic, Mystical, Quirky, Villain};

static VOICES: [VoiceDescriptor; 16] = [
    voice("ErXwobaYiN019PkySvjV", "Antoni", Male, Heroic, "Deep, warm American voice - excellent for German"),
    voice("VR6AewLTigWG4xSOukaG", "Arnold", Male, Heroic, "Strong, confident voice - great for German characters"),
    voice("yoZ06aMxZJJ28mfd3POQ", "Sam", Male, Character, "Young, energetic male - multilingual support"),
    voice("pqHfZKP75CvOlQylNhV4", "Bill", Male, Character, "Older, gruff character voice"),
    voice("EXAVITQu4vr4xnSDxMaL", "Ethan", Male, Quirky, "British accent, versatile for German"),
    voice("IKne3meq5aSn9XLyUdCD", "Charlie", Male, Quirky, "Australian accent, friendly tone"),
    voice("EXAVITQu4vr4xnSDxMaL", "Bella", Female, Heroic, "Elegant British voice - excellent German pronunciation"),
    voice("ThT5KcBeYPX3keUQqHPh", "Dorothy", Female, Heroic, "Warm, trustworthy - great for German"),
    voice("XB0fDUnXU5q5KVOYJpqr", "Charlotte", Female, Heroic, "Sophisticated, clear pronunciation"),
    voice("pFZP5JQG7iQjIQuC4Bku", "Freya", Female, Quirky, "Young, energetic - perfect for German names"),
    voice("AZnzlk1XvdvUeBnXmlld", "Domi", Female, Quirky, "Playful, expressive - multilingual"),
    voice("TxGEqnHWrfWFTfGW9XjX", "Grace", Female, Mystical, "Gentle, magical tone"),
    voice("flq6f7yk4E4fJM5XTYuZ", "Fin", Neutral, Mystical, "Ethereal, otherworldly"),
    voice("JBFqnCBsd6RMkjVDRZzb", "Giovanni", Male, Villain, "Sophisticated antagonist voice"),
    voice("bVMeCyTHy58xNoL34h3p", "Jeremy", Male, Character, "Young Irish accent - versatile"),
    voice("CYw3kZ02Hs0563khs1Fj", "Dave", Male, Character, "British Essex accent - distinctive"),
];

/// Every selectable voice, in display order.
pub fn list_voices() -> &'static [VoiceDescriptor] {
    &VOICES
}

/// First catalog entry with `id`. Two entries share an id upstream
/// (Ethan/Bella); the earlier one wins.
pub fn find_voice(id: &str) -> Option<&'static VoiceDescriptor> {
    VOICES.iter().find(|v| v.id == id)
}
