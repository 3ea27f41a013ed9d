use rand::Rng;

pub const NICKNAME_MAX_CHARS: usize = 10;
pub const IDENTITY_DIGITS: usize = 22;

/// Source of the identity token sent with every bridge request.
///
/// Storage is up to the implementor; the bridge reads the token once per cartridge construction.
pub trait IdentityProvider {
    fn get_identity(&self) -> Option<String>;

    fn set_identity(&mut self, identity: &str);

    /// Ask the user for a nickname to build a new identity from. Returning `None` (e.g. no
    /// interactive terminal) yields an identity with an empty nickname.
    fn prompt_nickname(&mut self) -> Option<String>;
}

/// Build a new identity token: the trimmed nickname cut to 10 characters, then `" WE"` and 22
/// random decimal digits.
pub fn generate_identity<R>(nickname: &str, rng: &mut R) -> String
where
    R: Rng + ?Sized,
{
    let mut identity: String = nickname.trim().chars().take(NICKNAME_MAX_CHARS).collect();
    identity.push_str(" WE");
    for _ in 0..IDENTITY_DIGITS {
        identity.push(char::from(b'0' + rng.gen_range(0..10)));
    }
    identity
}

/// Return the stored identity, creating and storing a new one if there is none.
pub fn resolve_identity(provider: &mut dyn IdentityProvider) -> String {
    resolve_identity_with(provider, &mut rand::thread_rng())
}

pub(crate) fn resolve_identity_with<R>(provider: &mut dyn IdentityProvider, rng: &mut R) -> String
where
    R: Rng + ?Sized,
{
    if let Some(identity) = provider.get_identity() {
        return identity;
    }

    let nickname = provider.prompt_nickname().unwrap_or_default();
    let identity = generate_identity(&nickname, rng);
    provider.set_identity(&identity);

    log::info!("Created new PlusROM identity '{identity}'");

    identity
}

/// Identity provider that keeps everything in memory, with an optional canned nickname answer.
#[derive(Debug, Clone, Default)]
pub struct MemoryIdentityStore {
    identity: Option<String>,
    nickname: Option<String>,
    prompt_count: u32,
}

impl MemoryIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_identity(identity: &str) -> Self {
        Self { identity: Some(identity.into()), ..Self::default() }
    }

    #[must_use]
    pub fn with_nickname(nickname: &str) -> Self {
        Self { nickname: Some(nickname.into()), ..Self::default() }
    }

    #[must_use]
    pub fn prompt_count(&self) -> u32 {
        self.prompt_count
    }
}

impl IdentityProvider for MemoryIdentityStore {
    fn get_identity(&self) -> Option<String> {
        self.identity.clone()
    }

    fn set_identity(&mut self, identity: &str) {
        self.identity = Some(identity.into());
    }

    fn prompt_nickname(&mut self) -> Option<String> {
        self.prompt_count += 1;
        self.nickname.clone()
    }
}
