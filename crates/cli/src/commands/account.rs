//! Account commands: sign-in, sign-up, guest mode and friends.
//!
//! # Usage
//!
//! ```bash
//! ck-cli sign-up -e jane@example.com -n "Jane Doe" -r restaurant_owner
//! ck-cli admin sign-in -e ops@example.com
//! ck-cli guest -n "Jane Doe" -p +15551234567 -e jane@example.com
//! ck-cli sign-out
//! ```

use secrecy::SecretString;

use cloud_kitchen_storefront::Storefront;
use cloud_kitchen_storefront::identity::{AuthError, IdentityState, SignUpOutcome, SignUpRequest};
use cloud_kitchen_storefront::models::Profile;

#[allow(clippy::print_stdout)]
fn print_profile(profile: &Profile) {
    println!("Signed in as {} <{}>", profile.display_name(), profile.email);
    println!("  id:   {}", profile.id);
    println!("  role: {}", profile.role);
}

/// Sign in with e-mail and password.
pub async fn sign_in(
    storefront: &Storefront,
    email: &str,
    password: &SecretString,
) -> Result<(), AuthError> {
    let profile = storefront.identity().sign_in(email, password).await?;
    print_profile(&profile);
    Ok(())
}

/// Sign in and require the admin role.
pub async fn admin_sign_in(
    storefront: &Storefront,
    email: &str,
    password: &SecretString,
) -> Result<(), AuthError> {
    let profile = storefront.identity().admin_sign_in(email, password).await?;
    print_profile(&profile);
    Ok(())
}

/// Register a new account.
#[allow(clippy::print_stdout)]
pub async fn sign_up(storefront: &Storefront, request: &SignUpRequest) -> Result<(), AuthError> {
    match storefront.identity().sign_up(request).await? {
        SignUpOutcome::SignedIn(profile) => print_profile(&profile),
        SignUpOutcome::VerificationRequired { email } => {
            println!("Check {email} for a confirmation link, then sign in.");
        }
    }
    Ok(())
}

/// Sign out from any mode.
#[allow(clippy::print_stdout)]
pub async fn sign_out(storefront: &Storefront) {
    storefront.identity().sign_out().await;
    println!("Signed out.");
}

/// Enter guest mode.
#[allow(clippy::print_stdout)]
pub async fn guest(
    storefront: &Storefront,
    full_name: &str,
    phone: &str,
    email: &str,
) -> Result<(), AuthError> {
    let info = storefront
        .identity()
        .continue_as_guest(full_name, phone, email)
        .await?;
    println!("Continuing as guest {} <{}>", info.full_name(), info.email());
    Ok(())
}

/// Print the current identity.
#[allow(clippy::print_stdout)]
pub fn whoami(storefront: &Storefront) {
    match storefront.identity_state() {
        IdentityState::Authenticated(profile) => print_profile(&profile),
        IdentityState::Guest(info) => {
            println!("Guest {} <{}>, {}", info.full_name(), info.email(), info.phone());
        }
        IdentityState::Anonymous | IdentityState::Loading => println!("Not signed in."),
    }
}

/// Send a password reset e-mail.
#[allow(clippy::print_stdout)]
pub async fn reset_password(storefront: &Storefront, email: &str) -> Result<(), AuthError> {
    storefront.identity().reset_password(email).await?;
    println!("If an account exists for {email}, a reset link is on its way.");
    Ok(())
}

/// Send the sign-up confirmation e-mail again.
#[allow(clippy::print_stdout)]
pub async fn resend_verification(storefront: &Storefront, email: &str) -> Result<(), AuthError> {
    storefront.identity().resend_verification(email).await?;
    println!("Confirmation e-mail sent to {email}.");
    Ok(())
}
